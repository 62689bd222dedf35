//! `pthread_create` wrapper and the thread-entry trampoline it routes
//! through, so every new thread gets its per-compartment stacks set up and
//! switches onto its own compartment's stack before running the user's
//! start function.

use std::ffi::c_void;

use crate::stack::stackptr_slot;

/// The thunk `__wrap_pthread_create` hands off to `ia2_thread_begin`. Freed
/// by `munmap` rather than the allocator, since the new thread needs to
/// free an allocation the parent made, which not every allocator permits
/// across threads during early startup.
#[repr(C)]
struct ThreadThunk {
    start: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
}

extern "C" {
    /// The real `pthread_create`, reachable via `--wrap=pthread_create`.
    fn __real_pthread_create(
        thread: *mut libc::pthread_t,
        attr: *const libc::pthread_attr_t,
        start: extern "C" fn(*mut c_void) -> *mut c_void,
        arg: *mut c_void,
    ) -> libc::c_int;

    /// Provided by the compartment initializer; repeats per-thread
    /// allocation of every compartment's stack on the calling thread.
    fn init_stacks_and_setup_tls();

    /// Returns the tag (pkey on x86, `x18` byte on AArch64) identifying
    /// which compartment this thread is currently executing in.
    fn ia2_get_tag() -> usize;
}

/// Entry point every new thread actually starts at. Sets up this thread's
/// stacks, then switches onto the stack for its current compartment before
/// tail-calling the user's start function.
///
/// # Safety
/// `arg` must point at a live [`ThreadThunk`] allocated by
/// `__wrap_pthread_create` via `mmap`, and ownership of that allocation
/// transfers to this function (it is `munmap`'d here).
pub unsafe extern "C" fn ia2_thread_begin(arg: *mut c_void) -> *mut c_void {
    let thunk = arg as *mut ThreadThunk;
    let start = (*thunk).start;
    let data = (*thunk).arg;
    libc::munmap(arg, std::mem::size_of::<ThreadThunk>());

    init_stacks_and_setup_tls();

    let tag = ia2_get_tag();
    let new_sp_addr = stackptr_slot(tag as u8);

    #[cfg(target_arch = "x86_64")]
    let result: *mut c_void;
    #[cfg(target_arch = "x86_64")]
    std::arch::asm!(
        "mov rdi, rsp",
        "mov rsp, [{new_sp}]",
        "push rdi",
        "push rbp",
        "mov rdi, {data}",
        "mov rbp, rsp",
        "and rsp, 0xfffffffffffffff0",
        "call {start}",
        "mov rsp, rbp",
        "pop rbp",
        "pop rsp",
        new_sp = in(reg) new_sp_addr,
        data = in(reg) data,
        start = in(reg) start,
        out("rax") result,
        clobber_abi("C"),
    );

    #[cfg(target_arch = "aarch64")]
    let result: *mut c_void;
    #[cfg(target_arch = "aarch64")]
    std::arch::asm!(
        "mov x10, sp",
        "ldr x9, [{new_sp}]",
        "mov sp, x9",
        "str x10, [sp, #-8]!",
        "mov x0, {data}",
        "blr {start}",
        "ldr x10, [sp], #8",
        "mov sp, x10",
        new_sp = in(reg) new_sp_addr,
        data = in(reg) data,
        start = in(reg) start,
        out("x0") result,
        clobber_abi("C"),
    );

    result
}

/// `__wrap_pthread_create`: allocates a tiny `MAP_ANON` thunk (never the
/// global allocator — see [`ThreadThunk`]'s doc comment) and starts the new
/// thread at [`ia2_thread_begin`] instead of the caller's function
/// directly.
///
/// # Safety
/// Matches `pthread_create`'s own safety contract: `thread` and `attr`
/// must be valid for the call, and `start`/`arg` must remain valid until
/// the new thread has finished using them.
#[no_mangle]
pub unsafe extern "C" fn __wrap_pthread_create(
    thread: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
) -> libc::c_int {
    let mmap_res = libc::mmap(
        std::ptr::null_mut(),
        std::mem::size_of::<ThreadThunk>(),
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if mmap_res == libc::MAP_FAILED {
        return -1;
    }
    let thunk = mmap_res as *mut ThreadThunk;
    (*thunk).start = start;
    (*thunk).arg = arg;

    __real_pthread_create(thread, attr, std::mem::transmute(ia2_thread_begin as usize), thunk as *mut c_void)
}
