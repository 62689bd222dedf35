use ia2_abi::SlotKind;

use crate::error::WrapgenError;
use crate::kind::WrapperKind;
use crate::request::WrapperRequest;

const INT_ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const FLOAT_ARG_REGS: [&str; 8] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
];
const INT_RET_REGS: [&str; 2] = ["rax", "rdx"];
const FLOAT_RET_REGS: [&str; 2] = ["xmm0", "xmm1"];

struct Asm {
    lines: Vec<String>,
}

impl Asm {
    fn new() -> Self {
        Self { lines: Vec::new() }
    }
    fn raw(&mut self, s: impl Into<String>) {
        self.lines.push(s.into());
    }
    fn i(&mut self, s: impl Into<String>) {
        self.lines.push(format!("\t{}", s.into()));
    }
    fn label(&mut self, s: impl Into<String>) {
        self.lines.push(format!("{}:", s.into()));
    }
    fn comment(&mut self, s: impl Into<String>) {
        self.lines.push(format!("\t// {}", s.into()));
    }
    fn finish(self) -> String {
        self.lines.join("\n") + "\n"
    }
}

/// Registers consumed by a slot sequence, respecting the SysV register
/// budget (6 integer, 8 SSE); anything beyond that is `Memory` per
/// [`ia2_abi`]'s classifier and is already excluded from this count.
fn live_arg_regs(slots: &[SlotKind]) -> (Vec<&'static str>, Vec<&'static str>) {
    let mut ints = Vec::new();
    let mut floats = Vec::new();
    for slot in slots {
        match slot {
            SlotKind::Integer if ints.len() < INT_ARG_REGS.len() => ints.push(INT_ARG_REGS[ints.len()]),
            SlotKind::Float if floats.len() < FLOAT_ARG_REGS.len() => {
                floats.push(FLOAT_ARG_REGS[floats.len()])
            }
            _ => {}
        }
    }
    (ints, floats)
}

fn live_ret_regs(slots: &[SlotKind]) -> (Vec<&'static str>, Vec<&'static str>) {
    let mut ints = Vec::new();
    let mut floats = Vec::new();
    for slot in slots {
        match slot {
            SlotKind::Integer if ints.len() < INT_RET_REGS.len() => ints.push(INT_RET_REGS[ints.len()]),
            SlotKind::Float if floats.len() < FLOAT_RET_REGS.len() => {
                floats.push(FLOAT_RET_REGS[floats.len()])
            }
            _ => {}
        }
    }
    (ints, floats)
}

/// PKRU mask that grants read/write to exactly `pkeys`, denying all others.
/// Each pkey owns a 2-bit field; `0b11` denies both access/disable bits.
fn pkru_mask(pkeys: &[u8]) -> u32 {
    let mut mask: u32 = 0xFFFF_FFFF;
    for &pkey in pkeys {
        mask &= !(0b11u32 << (pkey as u32 * 2));
    }
    mask
}

pub fn emit(req: &WrapperRequest) -> Result<String, WrapgenError> {
    let sig = &req.signature;
    let caller = req.caller_pkey;
    let target = req.target_pkey;
    let mem_args = sig.stack_arg_slots();
    let returns_memory = sig.returns_via_memory();
    let (int_args, float_args) = live_arg_regs(&sig.args);
    let (int_rets, float_rets) = live_ret_regs(&sig.ret);

    let mut a = Asm::new();
    a.raw(format!(".text"));
    if req.kind.emit_as_macro() {
        a.raw(format!("#define IA2_DEFINE_WRAPPER_{} \\", req.wrapper_name));
    }
    a.raw(format!(".global {}", req.wrapper_name));
    a.raw(format!(".hidden {}", req.wrapper_name));
    a.label(&req.wrapper_name);

    a.comment(format!(
        "call gate: compartment {caller} -> compartment {target}, kind {:?}",
        req.kind
    ));

    // 1. frame prologue
    a.i("push %rbp");
    a.i("mov %rsp, %rbp");
    // 2. callee-saved registers
    for reg in ["rbx", "r12", "r13", "r14", "r15"] {
        a.i(format!("push %{reg}"));
    }

    if req.debug_assertions {
        a.comment(format!("debug: assert current PKRU == caller({caller}) mask"));
        a.i("mov %eax, %r11d");
        a.i("rdpkru");
        a.i(format!("cmp $0x{:08x}, %eax", pkru_mask(&[caller])));
        a.i("je 1f");
        a.i("call __libia2_abort");
        a.label("1");
        a.i("mov %r11d, %eax");
    }

    // 4. intermediate PKRU: readable/writable for both caller and target.
    let intermediate = pkru_mask(&[caller, target]);
    a.comment("save rcx/rdx (wrpkru clobbers via rcx/rdx)");
    a.i("mov %rcx, %r10");
    a.i("mov %rdx, %r11");
    a.i(format!("mov $0x{intermediate:08x}, %eax"));
    a.i("xor %ecx, %ecx");
    a.i("xor %edx, %edx");
    a.i("wrpkru");
    a.i("mov %r10, %rcx");
    a.i("mov %r11, %rdx");

    // 5. stack switch: caller -> intermediate stack pointer bookkeeping.
    a.comment(format!("switch from compartment {caller} stack to compartment {target} stack"));
    a.i(format!("mov %rsp, ia2_stackptr_{caller}@GOTTPOFF(%rip)"));
    a.i(format!("mov ia2_stackptr_{target}@GOTTPOFF(%rip), %rsp"));

    if returns_memory {
        let ret_bytes = sig.ret.len() * 8;
        let padded = (ret_bytes + 15) & !15;
        a.comment("allocate memory-return buffer on target stack");
        a.i(format!("sub ${padded}, %rsp"));
        a.i("push %rdi"); // caller's return-buffer pointer, restored on the way back
        a.i("mov %rsp, %rdi");
        a.i("add $8, %rdi");
    }

    let stack_bytes = mem_args * 8 + if returns_memory { 8 } else { 0 };
    if stack_bytes % 16 != 0 {
        a.i("sub $8, %rsp");
    }

    if mem_args > 0 {
        a.comment(format!("copy {mem_args} stack argument(s) from caller's stack"));
        for i in (0..mem_args).rev() {
            a.i(format!("mov {}(%rbp), %rax", 16 + i * 8));
            a.i(format!("push %rax"));
        }
    }

    a.comment("scrub non-argument registers before crossing into the target compartment");
    for reg in &int_args {
        a.i(format!("push %{reg}"));
    }
    for reg in &float_args {
        a.i("sub $16, %rsp");
        a.i(format!("movdqu %{reg}, (%rsp)"));
    }
    a.i("call __libia2_scrub_registers");
    for reg in float_args.iter().rev() {
        a.i(format!("movdqu (%rsp), %{reg}"));
        a.i("add $16, %rsp");
    }
    for reg in int_args.iter().rev() {
        a.i(format!("pop %{reg}"));
    }

    if req.kind.is_indirect() {
        a.comment("load indirect target from the process-global scratch slot");
        a.i("mov ia2_fn_ptr(%rip), %r12");
    }

    // 11. PKRU -> target
    a.i("mov %rcx, %r10");
    a.i("mov %rdx, %r11");
    a.i(format!("mov $0x{:08x}, %eax", pkru_mask(&[target])));
    a.i("xor %ecx, %ecx");
    a.i("xor %edx, %edx");
    a.i("wrpkru");
    a.i("mov %r10, %rcx");
    a.i("mov %r11, %rdx");

    // 12. the call itself
    if req.kind.is_indirect() {
        a.i("call *%r12");
    } else {
        a.i(format!("call {}", req.target_symbol()?));
    }

    // 13. reverse the stack-setup steps
    a.i("mov %rcx, %r10");
    a.i("mov %rdx, %r11");
    a.i(format!("mov $0x{intermediate:08x}, %eax"));
    a.i("xor %ecx, %ecx");
    a.i("xor %edx, %edx");
    a.i("wrpkru");
    a.i("mov %r10, %rcx");
    a.i("mov %r11, %rdx");

    if mem_args > 0 {
        a.i(format!("add ${}, %rsp", mem_args * 8));
    }
    if stack_bytes % 16 != 0 {
        a.i("add $8, %rsp");
    }
    if returns_memory {
        a.comment("copy memory return value back into the caller's return buffer");
        let ret_bytes = sig.ret.len() * 8;
        for i in 0..sig.ret.len() {
            a.i(format!("mov {}(%rdi), %rax", i * 8));
            a.i(format!("mov %rax, {}(%rsp)", 8 + i * 8));
        }
        let padded = (ret_bytes + 15) & !15;
        a.i(format!("add ${padded}, %rsp"));
        a.i("pop %rax"); // the caller's original return-buffer pointer
    }

    // 14. switch stacks back
    a.comment(format!("switch from compartment {target} stack back to compartment {caller} stack"));
    a.i(format!("mov %rsp, ia2_stackptr_{target}@GOTTPOFF(%rip)"));
    a.i(format!("mov ia2_stackptr_{caller}@GOTTPOFF(%rip), %rsp"));

    // 15. scrub again, preserving return registers
    a.comment("scrub registers on return, preserving the return value location(s)");
    for reg in &int_rets {
        a.i(format!("push %{reg}"));
    }
    for reg in &float_rets {
        a.i("sub $16, %rsp");
        a.i(format!("movdqu %{reg}, (%rsp)"));
    }
    a.i("call __libia2_scrub_registers");
    for reg in float_rets.iter().rev() {
        a.i(format!("movdqu (%rsp), %{reg}"));
        a.i("add $16, %rsp");
    }
    for reg in int_rets.iter().rev() {
        a.i(format!("pop %{reg}"));
    }

    // 16. restore caller PKRU, epilogue
    a.i("mov %rcx, %r10");
    a.i("mov %rdx, %r11");
    a.i(format!("mov $0x{:08x}, %eax", pkru_mask(&[caller])));
    a.i("xor %ecx, %ecx");
    a.i("xor %edx, %edx");
    a.i("wrpkru");
    a.i("mov %r10, %rcx");
    a.i("mov %r11, %rdx");
    for reg in ["r15", "r14", "r13", "r12", "rbx"] {
        a.i(format!("pop %{reg}"));
    }
    a.i("pop %rbp");
    a.i("ret");

    if req.kind == WrapperKind::PointerToStatic {
        // every line of a macro definition needs a trailing continuation
        let body = a.finish();
        return Ok(body
            .lines()
            .collect::<Vec<_>>()
            .join(" \\\n"));
    }

    Ok(a.finish())
}
