//! Load-time compartment initializer: constructors that discover each
//! compartment's loaded segments via
//! `dl_iterate_phdr`, tag them with the compartment's pkey/MTE tag, and
//! allocate per-thread, per-compartment stacks before any cross-compartment
//! call can happen.
//!
//! Linked directly into the guarded program as a `cdylib`/`rlib`, same as
//! `ia2-gate-runtime`, on which it depends for the stack-pointer TLS slots
//! it populates.

pub mod dlopen_wrapper;
pub mod error;
pub mod log_memory_maps;
pub mod protect_pages;
pub mod stack_init;

pub use dlopen_wrapper::set_loader_pkey;
pub use error::{CompartmentInitError, Result};
pub use log_memory_maps::{log_memory_maps, MappedRange};
pub use protect_pages::{protect_pages as protect_pages_for_dso, run_protect_pages, PhdrSearchArgs, SharedRange};
pub use stack_init::{allocate_stack, allocate_stack_0, ia2_set_up_tags, ia2_reinit_stack_err, verify_tls_padding, STACK_SIZE};

use std::sync::atomic::{AtomicBool, Ordering};

use ia2_gate_runtime::stack::set_stack_top;

/// One compartment's `INIT_RUNTIME`-equivalent inputs: its pkey and the
/// shared objects `protect_pages` should additionally sweep for it
/// (`extra_libraries`).
pub struct CompartmentConfig<'a> {
    pub pkey: u8,
    pub extra_libraries: Option<&'a str>,
    pub shared_sections: &'a [SharedRange],
}

static RUNTIME_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// `INIT_RUNTIME(N)` equivalent: runs once per process regardless of how
/// many compartments' translation units include the constructor that calls
/// this. Allocates the untrusted compartment's stack for the calling
/// thread and records the loader compartment's pkey for the `dlopen`
/// wrappers.
///
/// `anchor_address` should be the address of the calling constructor
/// itself, so `protect_pages` can identify which loaded object owns this
/// compartment's code.
pub fn init_runtime(compartments: &[CompartmentConfig], loader_pkey: u8) -> Result<()> {
    if RUNTIME_INITIALIZED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    allocate_stack_0()?;
    dlopen_wrapper::set_loader_pkey(loader_pkey);
    for cfg in compartments {
        init_compartment_stack(cfg.pkey)?;
    }
    verify_tls_padding()?;
    Ok(())
}

/// `IA2_COMPARTMENT N; #include <ia2_compartment_init.inc>` equivalent: runs
/// once per compartment per thread. Allocates this thread's stack for
/// `pkey`, `pkey_mprotect`s it, and records its top in the compartment's
/// TLS slot.
pub fn init_compartment_stack(pkey: u8) -> Result<()> {
    if ia2_gate_runtime::stack_top(pkey).is_some() {
        ia2_reinit_stack_err(pkey);
    }
    let top = allocate_stack(pkey)?;
    set_stack_top(pkey, top);
    ia2_gate_runtime::thread_data::record_stack(pkey, top);
    Ok(())
}

/// Tags every writable segment of the compartment's own shared objects
/// with its pkey. Must run with the current PKRU/`x18` already set to
/// `cfg.pkey` (the constructor runs inside the compartment it protects).
pub fn protect_compartment(cfg: &CompartmentConfig, anchor_address: usize) -> Result<()> {
    let mut args = PhdrSearchArgs {
        pkey: cfg.pkey,
        anchor_address,
        extra_libraries: cfg.extra_libraries,
        shared_sections: cfg.shared_sections,
        found_library_count: 0,
    };
    run_protect_pages(&mut args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compartment_config_carries_through_to_search_args() {
        let shared = [SharedRange { start: 0x1000, end: 0x2000 }];
        let cfg = CompartmentConfig {
            pkey: 3,
            extra_libraries: Some("libfoo.so"),
            shared_sections: &shared,
        };
        assert_eq!(cfg.pkey, 3);
        assert_eq!(cfg.shared_sections.len(), 1);
    }
}
