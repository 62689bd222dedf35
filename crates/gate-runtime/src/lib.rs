//! Runtime glue linked directly into the guarded program: per-thread
//! compartment stack slots, the stack-switch trampoline new threads start
//! at, register scrubbing after a gate returns, and the destructor
//! exit-policy table the tracer and generated constructors consult at
//! shutdown.

pub mod addr_location;
pub mod destructor;
pub mod error;
pub mod exit_policy;
pub mod scrub;
pub mod stack;
pub mod thread;
pub mod thread_data;

pub use addr_location::{locate_address, AddrLocation};
pub use destructor::{check_exit_policy, DestructorEntry};
pub use error::{GateRuntimeError, Result};
pub use exit_policy::{exit_policy_get, ExitPolicy};
pub use stack::{set_stack_top, stack_top, MAX_COMPARTMENTS};
