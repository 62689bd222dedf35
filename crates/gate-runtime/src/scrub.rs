//! Register scrubbing: after a call gate returns to its caller, any
//! argument/scratch registers that are not part of the return value are
//! cleared so the callee compartment cannot leak data through caller-saved
//! registers it never meant to return. Implemented symmetrically for
//! x86-64 and AArch64 rather than leaving the AArch64 side a stub.

/// Clears the x86-64 SysV caller-saved scratch registers other than
/// `rax`/`rdx` (the integer return pair) and `xmm0`/`xmm1` (the SSE return
/// pair). Called by the generated wrapper immediately after the callee
/// returns, before control reaches the caller.
///
/// # Safety
/// Must only be invoked from the wrapper trampoline's own stack frame,
/// immediately after the wrapped call returns and before any caller state
/// is restored.
#[cfg(target_arch = "x86_64")]
#[no_mangle]
pub unsafe extern "C" fn __libia2_scrub_registers() {
    std::arch::asm!(
        "xor rcx, rcx",
        "xor rsi, rsi",
        "xor rdi, rdi",
        "xor r8, r8",
        "xor r9, r9",
        "xor r10, r10",
        "xor r11, r11",
        out("rcx") _,
        out("rsi") _,
        out("rdi") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
    );
}

/// AArch64 equivalent of [`__libia2_scrub_registers`]: clears the
/// caller-saved general registers other than `x0`/`x1` (the AAPCS integer
/// return pair).
///
/// # Safety
/// Same contract as the x86-64 version.
#[cfg(target_arch = "aarch64")]
#[no_mangle]
pub unsafe extern "C" fn __libia2_scrub_registers() {
    std::arch::asm!(
        "mov x2, xzr",
        "mov x3, xzr",
        "mov x4, xzr",
        "mov x5, xzr",
        "mov x6, xzr",
        "mov x7, xzr",
        "mov x9, xzr",
        "mov x10, xzr",
        "mov x11, xzr",
        "mov x12, xzr",
        "mov x13, xzr",
        "mov x14, xzr",
        "mov x15, xzr",
        out("x2") _,
        out("x3") _,
        out("x4") _,
        out("x5") _,
        out("x6") _,
        out("x7") _,
        out("x9") _,
        out("x10") _,
        out("x11") _,
        out("x12") _,
        out("x13") _,
        out("x14") _,
        out("x15") _,
    );
}
