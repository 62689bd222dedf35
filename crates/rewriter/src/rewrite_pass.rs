//! The passes that touch function-pointer expressions and their declared
//! types: `FnPtrTypes`, `FnPtrExpr`, `FnPtrCall`, `FnPtrNull`, and
//! `FnPtrEq`, run together as one walk over a translation unit so every
//! pass sees the same local-variable context.

use std::collections::BTreeMap;

use lang_c::ast;
use lang_c::span::Node;

use ia2_abi::Arch;

use crate::addr_taken::AddrTakenSets;
use crate::callsite::CallSiteRegistry;
use crate::edit::{Edit, EditBuffer};
use crate::error::Result;
use crate::opaque::OpaqueRegistry;
use crate::types::{apply_derived, resolve_specifiers, ResolvedType, TypedefTable};

/// Local context threaded through one function body: the set of names
/// (parameters and locals) known to hold a function pointer, keyed to
/// their canonical [`ResolvedType`] so call sites can be classified.
#[derive(Debug, Default, Clone)]
struct Scope {
    fn_ptr_vars: BTreeMap<String, ResolvedType>,
}

/// Globally-known function names: every function declared or defined
/// anywhere in the build, needed to tell a direct call (`name(args)`
/// where `name` is a function) from an indirect one through a variable.
pub struct KnownFunctions<'a> {
    pub names: &'a std::collections::BTreeSet<String>,
    pub static_names: &'a std::collections::BTreeSet<String>,
}

pub struct RewritePass<'a> {
    pub file: &'a str,
    pub arch: Arch,
    pub typedefs: TypedefTable,
    pub known: &'a KnownFunctions<'a>,
    pub opaque: &'a mut OpaqueRegistry,
    pub addr_taken: &'a mut AddrTakenSets,
    pub callsites: &'a mut CallSiteRegistry,
    pub edits: &'a mut EditBuffer,
}

impl<'a> RewritePass<'a> {
    pub fn run(&mut self, unit: &ast::TranslationUnit) -> Result<()> {
        let mut scope = Scope::default();
        for ext in &unit.0 {
            match &ext.node {
                ast::ExternalDeclaration::Declaration(decl) => {
                    crate::fndecl::record_typedefs(&decl.node, &mut self.typedefs);
                    self.visit_top_level_declaration(&decl.node, &mut scope);
                }
                ast::ExternalDeclaration::FunctionDefinition(def) => {
                    let mut fn_scope = scope.clone();
                    self.visit_params(&def.node, &mut fn_scope);
                    self.visit_statement(&def.node.statement, &mut fn_scope);
                }
                ast::ExternalDeclaration::StaticAssert(_) => {}
            }
        }
        Ok(())
    }

    // -- FnPtrTypes --------------------------------------------------------

    /// Record a function-pointer-typed declaration's opaque struct and
    /// splice `struct IA2_fnptr_<mangled> <name>` in place of the original
    /// spelling. Applies to top-level variables, typedefs already resolved
    /// upstream, parameters, and struct fields (the latter two call this
    /// same helper from their own declarator walks).
    fn rewrite_fn_ptr_declarator(
        &mut self,
        base: &ResolvedType,
        declarator: &Node<ast::Declarator>,
        whole_span: lang_c::span::Span,
    ) {
        let (ty, name) = apply_derived(base.clone(), &declarator.node, &self.typedefs);
        if !ty.is_function_pointer() {
            return;
        }
        let mangled = self.opaque.intern(&ty, &ty.render_c());
        let struct_name = format!("IA2_fnptr_{mangled}");
        let rendered = match &name {
            Some(n) => format!("struct {struct_name} {n}"),
            None => format!("struct {struct_name}"),
        };
        self.edits.push(Edit::new(whole_span, rendered));
    }

    fn visit_top_level_declaration(&mut self, decl: &ast::Declaration, scope: &mut Scope) {
        let is_typedef = decl.specifiers.iter().any(|s| {
            matches!(
                s.node,
                ast::DeclarationSpecifier::StorageClass(ref sc)
                    if matches!(sc.node, ast::StorageClassSpecifier::Typedef)
            )
        });
        let base = resolve_specifiers(&decl.specifiers, &self.typedefs);
        for init in &decl.declarators {
            let span = init.span;
            let (ty, name) = apply_derived(base.clone(), &init.node.declarator.node, &self.typedefs);
            if ty.is_function_pointer() {
                if !is_typedef {
                    self.rewrite_fn_ptr_declarator(&base, &init.node.declarator, span);
                    if let Some(name) = &name {
                        scope.fn_ptr_vars.insert(name.clone(), ty.clone());
                    }
                }
            }
            if let (false, Some(name), Some(initializer)) =
                (is_typedef, &name, &init.node.initializer)
            {
                if ty.is_function_pointer() {
                    self.visit_fn_ptr_initializer(name, initializer);
                }
            }
        }
    }

    fn visit_params(&mut self, def: &ast::FunctionDefinition, scope: &mut Scope) {
        for derived in &def.declarator.node.derived {
            if let ast::DerivedDeclarator::Function(f) = &derived.node {
                for param in &f.node.parameters {
                    let base = resolve_specifiers(&param.node.specifiers, &self.typedefs);
                    let Some(declarator) = &param.node.declarator else { continue };
                    let (ty, name) = apply_derived(base.clone(), &declarator.node, &self.typedefs);
                    if ty.is_function_pointer() {
                        self.rewrite_fn_ptr_declarator(&base, declarator, declarator.span);
                        if let Some(name) = name {
                            scope.fn_ptr_vars.insert(name, ty);
                        }
                    }
                }
            }
        }
    }

    // -- FnPtrNull ---------------------------------------------------------

    fn visit_fn_ptr_initializer(&mut self, _name: &str, initializer: &Node<ast::Initializer>) {
        let ast::Initializer::Expression(expr) = &initializer.node else {
            return;
        };
        if is_null_pointer_constant(&expr.node) {
            self.edits.push(Edit::new(initializer.span, "{NULL}"));
            return;
        }
        // FnPtrExpr (step 3) also applies to a function name spelled directly
        // in a function-pointer initializer, e.g. `void (*cb)(int) = some_fn;`.
        if let ast::Expression::Identifier(id) = &expr.node {
            if self.known.names.contains(&id.node.name) {
                let name = id.node.name.clone();
                self.edits.push(Edit::new(expr.span, format!("IA2_FN({name})")));
                if self.known.static_names.contains(&name) {
                    self.addr_taken.record_internal(self.file, &name, &name);
                } else {
                    self.addr_taken.record_external(&name, &name);
                }
            }
        }
    }

    // -- statement / expression walk -------------------------------------

    fn visit_statement(&mut self, stmt: &Node<ast::Statement>, scope: &mut Scope) {
        match &stmt.node {
            ast::Statement::Compound(items) => {
                let mut inner = scope.clone();
                for item in items {
                    match &item.node {
                        ast::BlockItem::Declaration(decl) => {
                            self.visit_local_declaration(&decl.node, &mut inner);
                        }
                        ast::BlockItem::Statement(s) => self.visit_statement(s, &mut inner),
                        ast::BlockItem::StaticAssert(_) => {}
                    }
                }
            }
            ast::Statement::Expression(Some(expr)) => self.visit_expr(expr, scope, false),
            ast::Statement::If(if_stmt) => {
                self.visit_expr(&if_stmt.node.condition, scope, true);
                self.visit_statement(&if_stmt.node.then_statement, scope);
                if let Some(else_stmt) = &if_stmt.node.else_statement {
                    self.visit_statement(else_stmt, scope);
                }
            }
            ast::Statement::While(while_stmt) => {
                self.visit_expr(&while_stmt.node.expression, scope, true);
                self.visit_statement(&while_stmt.node.statement, scope);
            }
            ast::Statement::DoWhile(do_stmt) => {
                self.visit_statement(&do_stmt.node.statement, scope);
                self.visit_expr(&do_stmt.node.expression, scope, true);
            }
            ast::Statement::For(for_stmt) => {
                if let ast::ForInitializer::Expression(e) = &for_stmt.node.initializer.node {
                    self.visit_expr(e, scope, false);
                }
                if let Some(cond) = &for_stmt.node.condition {
                    self.visit_expr(cond, scope, true);
                }
                if let Some(step) = &for_stmt.node.step {
                    self.visit_expr(step, scope, false);
                }
                self.visit_statement(&for_stmt.node.statement, scope);
            }
            ast::Statement::Return(Some(expr)) => self.visit_expr(expr, scope, false),
            _ => {}
        }
    }

    fn visit_local_declaration(&mut self, decl: &ast::Declaration, scope: &mut Scope) {
        let base = resolve_specifiers(&decl.specifiers, &self.typedefs);
        for init in &decl.declarators {
            let span = init.span;
            let (ty, name) = apply_derived(base.clone(), &init.node.declarator.node, &self.typedefs);
            if ty.is_function_pointer() {
                self.rewrite_fn_ptr_declarator(&base, &init.node.declarator, span);
                if let Some(name) = &name {
                    scope.fn_ptr_vars.insert(name.clone(), ty.clone());
                }
                if let (Some(name), Some(initializer)) = (&name, &init.node.initializer) {
                    self.visit_fn_ptr_initializer(name, initializer);
                }
            }
        }
    }

    /// `bool_ctx` marks `if (p)` / `while (p)` conditions and `!p`/`p ==
    /// q`/`p != q` operands, where a function-pointer operand is wrapped
    /// in `IA2_ADDR(...)` instead of `IA2_FN(...)`.
    fn visit_expr(&mut self, expr: &Node<ast::Expression>, scope: &mut Scope, bool_ctx: bool) {
        match &expr.node {
            ast::Expression::Call(call) => self.visit_call(expr.span, &call.node, scope),
            ast::Expression::BinaryOperator(bin) => {
                let is_eq = matches!(
                    bin.node.operator.node,
                    ast::BinaryOperator::Equals | ast::BinaryOperator::NotEquals
                );
                let is_assign = matches!(bin.node.operator.node, ast::BinaryOperator::Assign);
                if is_assign && self.visit_fn_ptr_null_assignment(bin, scope) {
                    self.visit_expr(&bin.node.lhs, scope, false);
                    return;
                }
                self.visit_expr(&bin.node.lhs, scope, is_eq);
                self.visit_expr(&bin.node.rhs, scope, is_eq);
                if is_eq {
                    return;
                }
            }
            ast::Expression::UnaryOperator(un) => {
                let nested_bool = bool_ctx
                    || matches!(un.node.operator.node, ast::UnaryOperator::Negate);
                self.visit_expr(&un.node.operand, scope, nested_bool);
            }
            ast::Expression::Identifier(id) => {
                self.visit_identifier_expr(expr.span, &id.node.name, scope, bool_ctx);
            }
            _ => {}
        }
    }

    /// `FnPtrNull`, assignment form: `ptr = NULL;`
    /// becomes `ptr = (typeof(ptr)) {NULL};`, rendered here as the opaque
    /// struct's own `{NULL}` compound literal since the LHS's resolved type
    /// is already known. Returns whether `bin` was such an assignment (the
    /// caller skips the generic RHS walk in that case, since the RHS span
    /// has just been replaced wholesale).
    fn visit_fn_ptr_null_assignment(
        &mut self,
        bin: &Node<ast::BinaryOperatorExpression>,
        scope: &Scope,
    ) -> bool {
        let ast::Expression::Identifier(lhs_id) = &bin.node.lhs.node else {
            return false;
        };
        let Some(ty) = scope.fn_ptr_vars.get(&lhs_id.node.name) else {
            return false;
        };
        if !is_null_pointer_constant(&bin.node.rhs.node) {
            return false;
        }
        let mangled = self.opaque.intern(ty, &ty.render_c());
        self.edits.push(Edit::new(
            bin.node.rhs.span,
            format!("(struct IA2_fnptr_{mangled}) {{NULL}}"),
        ));
        true
    }

    /// `FnPtrCall`: a direct call `name(args)` where
    /// `name` is a known function is left untouched (the `FnDecl` pass and
    /// the linker `--wrap=` mechanism handle it); anything else is an
    /// indirect call gate, rewritten to `IA2_CALL(ptr, <sig>)(args...)`.
    fn visit_call(&mut self, _span: lang_c::span::Span, call: &ast::CallExpression, scope: &mut Scope) {
        for arg in &call.arguments {
            self.visit_expr(arg, scope, false);
        }
        if let ast::Expression::Identifier(id) = &call.callee.node {
            if self.known.names.contains(&id.node.name) {
                return; // direct call, no gate
            }
            if let Some(ty) = scope.fn_ptr_vars.get(&id.node.name) {
                let mangled = ty.mangle();
                self.callsites.record(&mangled, classify_for_callsite(ty, self.arch));
                self.edits.push(Edit::new(
                    call.callee.span,
                    format!("IA2_CALL({}, {mangled})", id.node.name),
                ));
            }
        }
    }

    /// `FnPtrExpr`: a bare function-name reference outside a direct-call
    /// callee or comparison operand position becomes `IA2_FN(name)`; inside
    /// a comparison/boolean position it becomes `IA2_FN_ADDR(name)` instead
    /// (the `FnPtrEq` pass).
    fn visit_identifier_expr(
        &mut self,
        span: lang_c::span::Span,
        name: &str,
        _scope: &mut Scope,
        bool_ctx: bool,
    ) {
        if !self.known.names.contains(name) {
            return;
        }
        if bool_ctx {
            self.edits.push(Edit::new(span, format!("IA2_FN_ADDR({name})")));
            return;
        }
        self.edits.push(Edit::new(span, format!("IA2_FN({name})")));
        if self.known.static_names.contains(name) {
            self.addr_taken.record_internal(self.file, name, name);
        } else {
            self.addr_taken.record_external(name, name);
        }
    }
}

fn is_null_pointer_constant(expr: &ast::Expression) -> bool {
    match expr {
        ast::Expression::Constant(c) => matches!(&c.node, ast::Constant::Integer(i) if i.number.as_ref() == "0"),
        ast::Expression::Identifier(id) => id.node.name == "NULL",
        _ => false,
    }
}

/// A best-effort ABI signature for an indirect callsite, used only to seed
/// the call-site registry keyed by mangled type; the wrapper emitter
/// re-derives the authoritative signature from the same [`ResolvedType`]
/// when it later walks [`CallSiteRegistry`].
fn classify_for_callsite(ty: &ResolvedType, arch: Arch) -> ia2_abi::AbiSignature {
    let ResolvedType::Pointer(inner) = ty else {
        return ia2_abi::AbiSignature { args: vec![], ret: vec![], variadic: false };
    };
    let ResolvedType::Function { ret, params, variadic } = inner.as_ref() else {
        return ia2_abi::AbiSignature { args: vec![], ret: vec![], variadic: false };
    };
    let arg_ctypes: Vec<_> = params.iter().map(ResolvedType::to_ctype).collect();
    ia2_abi::classify_function(&arg_ctypes, &ret.to_ctype(), *variadic, arch)
        .unwrap_or(ia2_abi::AbiSignature { args: vec![], ret: vec![], variadic: false })
}
