use ia2_abi::SlotKind;

use crate::error::WrapgenError;
use crate::kind::WrapperKind;
use crate::request::WrapperRequest;

const INT_ARG_REGS: [&str; 8] = ["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];
const FLOAT_ARG_REGS: [&str; 8] = ["d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7"];
const INT_RET_REGS: [&str; 2] = ["x0", "x1"];
const FLOAT_RET_REGS: [&str; 4] = ["d0", "d1", "d2", "d3"];

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

/// Emit the AArch64 call gate: stack switching, argument copying, `x18`
/// tagging, and register scrubbing, implemented symmetrically with the
/// x86-64 path.
pub fn emit(req: &WrapperRequest) -> Result<String, WrapgenError> {
    let sig = &req.signature;
    let caller = req.caller_pkey;
    let target = req.target_pkey;
    let mem_args = sig.stack_arg_slots();
    let returns_memory = sig.returns_via_memory();
    let (int_args, float_args) = live_arg_regs(&sig.args);
    let (int_rets, float_rets) = live_ret_regs(&sig.ret);

    let mut a = Asm::new();
    a.raw(".text");
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

    // Frame prologue.
    a.i("stp x29, x30, [sp, #-16]!");
    a.i("mov x29, sp");
    a.i("stp x19, x20, [sp, #-16]!");
    a.i("stp x21, x22, [sp, #-16]!");
    a.i("stp x23, x24, [sp, #-16]!");
    a.i("stp x25, x26, [sp, #-16]!");
    a.i("stp x27, x28, [sp, #-16]!");

    if req.debug_assertions {
        a.comment(format!("debug: assert current tag == caller({caller})"));
        a.i("bl __ia2_mte_get_tag");
        a.i(format!("cmp x0, #{caller}"));
        a.i("b.eq 1f");
        a.i("bl __libia2_abort");
        a.label("1");
    }

    a.comment(format!("switch from compartment {caller} stack to compartment {target} stack"));
    a.i(format!("adrp x9, ia2_stackptr_{caller}"));
    a.i(format!("str sp, [x9, #:lo12:ia2_stackptr_{caller}]"));
    a.i(format!("adrp x9, ia2_stackptr_{target}"));
    a.i(format!("ldr sp, [x9, #:lo12:ia2_stackptr_{target}]"));

    if returns_memory {
        let ret_bytes = sig.ret.len() * 8;
        let padded = (ret_bytes + 15) & !15;
        a.comment("allocate memory-return buffer on target stack");
        a.i(format!("sub sp, sp, #{padded}"));
        a.i("str x0, [sp, #-16]!"); // caller's return-buffer pointer
        a.i("mov x0, sp");
        a.i("add x0, x0, #16");
    }

    if mem_args > 0 {
        a.comment(format!("copy {mem_args} stack argument(s) from caller's stack"));
        for i in (0..mem_args).rev() {
            a.i(format!("ldr x9, [x29, #{}]", 16 + i * 8));
            a.i("str x9, [sp, #-8]!");
        }
    }

    a.comment("scrub non-argument registers before crossing into the target compartment");
    for reg in &int_args {
        a.i(format!("str {reg}, [sp, #-16]!"));
    }
    for reg in &float_args {
        a.i(format!("str {reg}, [sp, #-16]!"));
    }
    a.i("bl __libia2_scrub_registers");
    for reg in float_args.iter().rev() {
        a.i(format!("ldr {reg}, [sp], #16"));
    }
    for reg in int_args.iter().rev() {
        a.i(format!("ldr {reg}, [sp], #16"));
    }

    if req.kind.is_indirect() {
        a.comment("load indirect target from the process-global scratch slot");
        a.i("adrp x9, ia2_fn_ptr");
        a.i("ldr x9, [x9, #:lo12:ia2_fn_ptr]");
    }

    a.comment(format!("set MTE tag to target compartment {target}"));
    a.i(format!("mov x0, #{target}"));
    a.i("bl __ia2_mte_set_tag");

    if req.kind.is_indirect() {
        a.i("blr x9");
    } else {
        a.i(format!("bl {}", req.target_symbol()?));
    }

    a.comment(format!("set MTE tag back to an intermediate compartment reachable by both {caller} and {target}"));
    a.i(format!("mov x0, #{caller}"));
    a.i("bl __ia2_mte_set_tag");

    if mem_args > 0 {
        a.i(format!("add sp, sp, #{}", mem_args * 8));
    }
    if returns_memory {
        a.comment("copy memory return value back into the caller's return buffer");
        let ret_bytes = sig.ret.len() * 8;
        for i in 0..sig.ret.len() {
            a.i(format!("ldr x9, [x0, #{}]", i * 8));
            a.i(format!("str x9, [sp, #{}]", 16 + i * 8));
        }
        let padded = (ret_bytes + 15) & !15;
        a.i(format!("ldr x0, [sp], #16"));
        a.i(format!("add sp, sp, #{padded}"));
    }

    a.comment(format!("switch from compartment {target} stack back to compartment {caller} stack"));
    a.i(format!("adrp x9, ia2_stackptr_{target}"));
    a.i(format!("str sp, [x9, #:lo12:ia2_stackptr_{target}]"));
    a.i(format!("adrp x9, ia2_stackptr_{caller}"));
    a.i(format!("ldr sp, [x9, #:lo12:ia2_stackptr_{caller}]"));

    a.comment("scrub registers on return, preserving the return value location(s)");
    for reg in &int_rets {
        a.i(format!("str {reg}, [sp, #-16]!"));
    }
    for reg in &float_rets {
        a.i(format!("str {reg}, [sp, #-16]!"));
    }
    a.i("bl __libia2_scrub_registers");
    for reg in float_rets.iter().rev() {
        a.i(format!("ldr {reg}, [sp], #16"));
    }
    for reg in int_rets.iter().rev() {
        a.i(format!("ldr {reg}, [sp], #16"));
    }

    a.i("ldp x27, x28, [sp], #16");
    a.i("ldp x25, x26, [sp], #16");
    a.i("ldp x23, x24, [sp], #16");
    a.i("ldp x21, x22, [sp], #16");
    a.i("ldp x19, x20, [sp], #16");
    a.i("ldp x29, x30, [sp], #16");
    a.i("ret");

    if req.kind == WrapperKind::PointerToStatic {
        let body = a.finish();
        return Ok(body.lines().collect::<Vec<_>>().join(" \\\n"));
    }

    Ok(a.finish())
}
