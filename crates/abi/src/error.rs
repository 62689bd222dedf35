use thiserror::Error;

/// ABI classification failures: aborts on ObjC/block/member-pointer
/// scalars, complex scalars, variadic parameters passed by register, or
/// aggregates whose element classification is ambiguous.
#[derive(Debug, Error, PartialEq)]
pub enum AbiError {
    #[error("_Complex scalars are not supported for ABI classification")]
    ComplexScalar,

    #[error("ObjC object/block pointers and C++ member pointers are not supported for ABI classification")]
    ObjectPointerLike,

    #[error("variadic argument {index} would be passed in a register through an aggregate; not supported")]
    VariadicAggregate { index: usize },

    #[error("aggregate field classification is ambiguous at byte offset {offset}")]
    AmbiguousAggregate { offset: usize },
}
