//! Dynamic name lookup.
//!
//! When enabled, identifiers that do not resolve are not errors: the
//! analyzer marks them (and everything computed from them) as dependent.
//! After a declaration group has been analysed, [`DynamicExprTransformer`]
//! replaces each maximal dependent expression with a call into the runtime:
//!
//! ```text
//! (T)__cinder_eval(gCinder, "<template>", &v1, &v2, ...)
//! ```
//!
//! The template is the expression's source with every captured variable
//! reference replaced by `@`-addressed accesses; the runtime substitutes the
//! addresses and compiles the template once the names can be resolved.

use std::collections::HashSet;

use crate::compiler::ast::*;
use crate::compiler::lir::Builtin;
use crate::compiler::printer::Printer;
use crate::compiler::sema::{builtin_signature, Constant, Sema, SemaError};
use crate::compiler::tokens::Span;
use crate::compiler::types::{CType, TypeTable};

/// Name of the global holding the session handle passed to the runtime.
pub const SESSION_HANDLE_GLOBAL: &str = "gCinder";

/// What the analyzer should do with a name nobody declared.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Defer resolution to run time.
    Dependent,
    /// Treat the name as a global holding `value`.
    Bind { ty: CType, value: Constant },
}

/// Consulted by the analyzer for unqualified names that fail normal lookup.
pub trait UnresolvedNameHandler {
    fn lookup_unqualified(&mut self, name: &str, span: Span) -> Option<Recovery>;
}

/// Marks every unresolved name as resolvable at run time.
#[derive(Debug, Default)]
pub struct DynamicIdHandler;

impl UnresolvedNameHandler for DynamicIdHandler {
    fn lookup_unqualified(&mut self, name: &str, _span: Span) -> Option<Recovery> {
        tracing::trace!(name, "deferring lookup to run time");
        Some(Recovery::Dependent)
    }
}

/// One expression handed to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedSymbolRecord {
    /// Names that could not be resolved, in order of appearance.
    pub names: Vec<String>,
    /// Enclosing statement of the function body being transformed.
    pub stmt: Option<NodeId>,
    /// Variables whose addresses are passed along, in template order.
    pub captured: Vec<(String, CType)>,
    pub template: String,
    pub expected: Option<CType>,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct DynamicExprTransformer {
    records: Vec<UnresolvedSymbolRecord>,
    dirty: HashSet<NodeId>,
    enabled: bool,
}

struct VisitCtx<'a> {
    sema: &'a Sema,
    types: &'a TypeTable,
    top: Option<NodeId>,
    ret: CType,
}

impl DynamicExprTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn records(&self) -> &[UnresolvedSymbolRecord] {
        &self.records
    }

    /// Statements whose tree no longer matches their source text.
    pub fn dirty(&self) -> &HashSet<NodeId> {
        &self.dirty
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.dirty.clear();
    }

    /// Rewrites every dependent expression in `group`.
    pub fn visit_group(
        &mut self,
        group: &mut DeclGroup,
        sema: &Sema,
    ) -> Result<(), Vec<SemaError>> {
        let mut errors = Vec::new();
        for decl in &mut group.decls {
            match &mut decl.kind {
                DeclKind::Function(f) => {
                    let ret = f.ret.clone();
                    let Some(Stmt { kind: StmtKind::Compound(stmts), .. }) = f.body.as_mut() else {
                        continue;
                    };
                    for stmt in stmts.iter_mut() {
                        let ctx = VisitCtx {
                            sema,
                            types: sema.types(),
                            top: Some(stmt.id),
                            ret: ret.clone(),
                        };
                        self.visit_stmt(stmt, &ctx, &mut errors);
                    }
                }
                DeclKind::Var(v) => {
                    let ctx = VisitCtx { sema, types: sema.types(), top: None, ret: CType::Void };
                    let ty = v.ty.clone();
                    if let Some(init) = v.init.as_mut() {
                        self.visit_init(init, &ty, &ctx, &mut errors);
                    }
                }
                _ => {}
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn visit_stmt(&mut self, s: &mut Stmt, ctx: &VisitCtx<'_>, errors: &mut Vec<SemaError>) {
        match &mut s.kind {
            StmtKind::Expr(e) => self.visit_expr(e, None, ctx, errors),
            StmtKind::Decl(group) => {
                for decl in &mut group.decls {
                    if let DeclKind::Var(v) = &mut decl.kind {
                        let ty = v.ty.clone();
                        if let Some(init) = v.init.as_mut() {
                            self.visit_init(init, &ty, ctx, errors);
                        }
                    }
                }
            }
            StmtKind::Compound(stmts) => {
                for stmt in stmts {
                    self.visit_stmt(stmt, ctx, errors);
                }
            }
            StmtKind::If { cond, then, els } => {
                self.visit_expr(cond, Some(CType::Bool), ctx, errors);
                self.visit_stmt(then, ctx, errors);
                if let Some(els) = els {
                    self.visit_stmt(els, ctx, errors);
                }
            }
            StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
                self.visit_expr(cond, Some(CType::Bool), ctx, errors);
                self.visit_stmt(body, ctx, errors);
            }
            StmtKind::For { init, cond, step, body } => {
                if let Some(init) = init {
                    self.visit_stmt(init, ctx, errors);
                }
                if let Some(cond) = cond {
                    self.visit_expr(cond, Some(CType::Bool), ctx, errors);
                }
                if let Some(step) = step {
                    self.visit_expr(step, None, ctx, errors);
                }
                self.visit_stmt(body, ctx, errors);
            }
            StmtKind::Return(Some(e)) => {
                let ret = ctx.ret.clone();
                self.visit_expr(e, Some(ret), ctx, errors);
            }
            StmtKind::Null | StmtKind::Break | StmtKind::Continue | StmtKind::Return(None) => {}
        }
    }

    fn visit_init(
        &mut self,
        init: &mut Initializer,
        ty: &CType,
        ctx: &VisitCtx<'_>,
        errors: &mut Vec<SemaError>,
    ) {
        match init {
            Initializer::Expr(e) => self.visit_expr(e, Some(ty.clone()), ctx, errors),
            Initializer::List(items, _) => match ty {
                CType::Array(elem, _) => {
                    for item in items {
                        self.visit_init(item, elem, ctx, errors);
                    }
                }
                CType::Record(id) => {
                    let fields =
                        ctx.types.record(*id).map(|r| r.fields.clone()).unwrap_or_default();
                    for (field, item) in fields.iter().zip(items.iter_mut()) {
                        self.visit_init(item, &field.ty, ctx, errors);
                    }
                }
                _ => {
                    for item in items {
                        self.visit_init(item, ty, ctx, errors);
                    }
                }
            },
            Initializer::Construct(args, _) => {
                for arg in args {
                    self.visit_expr(arg, Some(ty.clone()), ctx, errors);
                }
            }
        }
    }

    fn visit_expr(
        &mut self,
        e: &mut Expr,
        expected: Option<CType>,
        ctx: &VisitCtx<'_>,
        errors: &mut Vec<SemaError>,
    ) {
        if e.ty.is_dependent() {
            self.replace(e, expected, ctx, errors);
            return;
        }
        match &mut e.kind {
            ExprKind::Assign(_, lhs, rhs) => {
                let target = lhs.ty.clone();
                self.visit_expr(lhs, None, ctx, errors);
                self.visit_expr(rhs, Some(target), ctx, errors);
            }
            ExprKind::Cast(target, operand) => {
                let target = target.resolved.clone();
                self.visit_expr(operand, Some(target), ctx, errors);
            }
            ExprKind::Call(callee, args) => {
                let params = match &callee.kind {
                    ExprKind::Ident(name, Binding::Function) => {
                        let sig = ctx.sema.function_sig(name);
                        sig.map(|sig| sig.params.clone()).unwrap_or_default()
                    }
                    ExprKind::Ident(_, Binding::Builtin(b)) => {
                        builtin_signature(*b).map(|sig| sig.params).unwrap_or_default()
                    }
                    _ => Vec::new(),
                };
                for (i, arg) in args.iter_mut().enumerate() {
                    self.visit_expr(arg, params.get(i).cloned(), ctx, errors);
                }
            }
            ExprKind::Unary(_, a) | ExprKind::SizeofExpr(a) | ExprKind::Member { base: a, .. } => {
                self.visit_expr(a, None, ctx, errors)
            }
            ExprKind::Binary(_, a, b) | ExprKind::Index(a, b) | ExprKind::Comma(a, b) => {
                self.visit_expr(a, None, ctx, errors);
                self.visit_expr(b, None, ctx, errors);
            }
            ExprKind::Conditional(a, b, c) => {
                self.visit_expr(a, Some(CType::Bool), ctx, errors);
                self.visit_expr(b, None, ctx, errors);
                self.visit_expr(c, None, ctx, errors);
            }
            _ => {}
        }
    }

    fn replace(
        &mut self,
        e: &mut Expr,
        expected: Option<CType>,
        ctx: &VisitCtx<'_>,
        errors: &mut Vec<SemaError>,
    ) {
        let mut names = Vec::new();
        let mut captured: Vec<(String, Binding, CType)> = Vec::new();
        collect_names(e, &mut names, &mut captured);

        let handle_ty = ctx.sema.global_var(SESSION_HANDLE_GLOBAL).cloned();
        let ready = self.enabled && ctx.sema.has_runtime_universe();
        let Some(handle_ty) = handle_ty.filter(|_| ready) else {
            let name = names.first().cloned().unwrap_or_default();
            let message = format!("use of undeclared identifier '{}'", name);
            errors.push(SemaError { message, span: e.span });
            return;
        };
        if let Some(t) = &expected {
            if !t.is_scalar() && !t.is_void() {
                errors.push(SemaError {
                    message: format!(
                        "cannot convert a value resolved at run time to '{}'",
                        ctx.types.name(t)
                    ),
                    span: e.span,
                });
                return;
            }
        }

        let template = {
            let capture_text = |ident: &Expr| -> Option<String> {
                let ExprKind::Ident(_, binding) = &ident.kind else { return None };
                if !binding.is_variable() {
                    return None;
                }
                Some(match &ident.ty {
                    CType::Array(elem, _) => {
                        format!("(({})@)", ctx.types.name(&CType::pointer_to((**elem).clone())))
                    }
                    ty => format!("(*({})@)", ctx.types.name(&CType::pointer_to(ty.clone()))),
                })
            };
            Printer::new(ctx.types).with_ident_override(&capture_text).expr(e)
        };

        let span = e.span;
        let mut args = vec![
            Expr::typed(
                ExprKind::Ident(
                    SESSION_HANDLE_GLOBAL.to_string(),
                    Binding::Global { link_name: SESSION_HANDLE_GLOBAL.to_string() },
                ),
                span,
                handle_ty,
            ),
            Expr::typed(
                ExprKind::StrLit(template.clone()),
                span,
                CType::Array(Box::new(CType::CHAR), Some(template.len() as u64 + 1)),
            ),
        ];
        for (name, binding, ty) in &captured {
            let var = Expr::typed(ExprKind::Ident(name.clone(), binding.clone()), span, ty.clone());
            let addr = ExprKind::Unary(UnaryOp::AddrOf, Box::new(var));
            args.push(Expr::typed(addr, span, CType::pointer_to(ty.clone())));
        }
        let callee = Expr::typed(
            ExprKind::Ident(Builtin::Eval.name().to_string(), Binding::Builtin(Builtin::Eval)),
            span,
            CType::Void,
        );
        let call = Expr::typed(ExprKind::Call(Box::new(callee), args), span, CType::Dynamic);
        let replacement = match &expected {
            Some(t) => {
                let target = TypeName {
                    spec: DeclSpec {
                        base: BaseType::Auto,
                        storage: Storage::None,
                        is_const: false,
                        is_inline: false,
                        extern_c: false,
                        span,
                    },
                    declarator: Declarator { name: None, pointers: 0, suffixes: Vec::new(), span },
                    resolved: t.clone(),
                };
                Expr::typed(ExprKind::Cast(Box::new(target), Box::new(call)), span, t.clone())
            }
            None => call,
        };

        tracing::debug!(template = %template, names = ?names, "deferred expression to run time");
        self.records.push(UnresolvedSymbolRecord {
            names,
            stmt: ctx.top,
            captured: captured.into_iter().map(|(name, _, ty)| (name, ty)).collect(),
            template,
            expected,
            span,
        });
        if let Some(top) = ctx.top {
            self.dirty.insert(top);
        }
        *e = replacement;
    }
}

/// Unresolved names and captured variables of `e`, in first-use order.
fn collect_names(e: &Expr, names: &mut Vec<String>, captured: &mut Vec<(String, Binding, CType)>) {
    if let ExprKind::Ident(name, binding) = &e.kind {
        match binding {
            Binding::Placeholder => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            b if b.is_variable() => {
                if !captured.iter().any(|(n, cb, _)| n == name && cb == b) {
                    captured.push((name.clone(), b.clone(), e.ty.clone()));
                }
            }
            _ => {}
        }
    }
    for child in e.children() {
        collect_names(child, names, captured);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;

    fn transform(
        src: &str,
        prelude: bool,
    ) -> (Vec<DeclGroup>, DynamicExprTransformer, Result<(), Vec<SemaError>>) {
        let mut sema = Sema::new();
        sema.set_handler(Some(Box::new(DynamicIdHandler)));
        let mut transformer = DynamicExprTransformer::new();
        transformer.set_enabled(true);
        let full = if prelude {
            sema.install_runtime_universe();
            format!("void *gCinder = (void *)0; {}", src)
        } else {
            src.to_string()
        };
        let tokens = Lexer::new(&full, 0, 0).tokenize().unwrap();
        let mut parser = Parser::new(tokens, sema.type_names());
        let mut groups = Vec::new();
        let mut result = Ok(());
        while let Some(mut group) = parser.parse_top_level().unwrap() {
            sema.analyze_top_level(&mut group).unwrap();
            if let Err(e) = transformer.visit_group(&mut group, &sema) {
                result = Err(e);
                break;
            }
            groups.push(group);
        }
        (groups, transformer, result)
    }

    #[test]
    fn replaces_maximal_dependent_expression() {
        let (groups, t, result) = transform("void f() { int i = 2; long r = gValue + i; }", true);
        assert!(result.is_ok());
        let rec = &t.records()[0];
        assert_eq!(rec.names, vec!["gValue".to_string()]);
        assert_eq!(rec.template, "gValue + (*(int *)@)");
        assert_eq!(rec.captured, vec![("i".to_string(), CType::INT)]);
        assert_eq!(rec.expected, Some(CType::LONG));
        assert_eq!(t.dirty().len(), 1);

        let f = groups[1].decls[0].as_function().unwrap();
        let Some(Stmt { kind: StmtKind::Compound(stmts), .. }) = &f.body else { panic!() };
        let printed = Printer::new(&TypeTable::new()).stmt(&stmts[1], 0);
        assert_eq!(printed, "long r = (long)__cinder_eval(gCinder, \"gValue + (*(int *)@)\", &i);");
    }

    #[test]
    fn expression_statements_stay_uncast() {
        let (_, t, result) = transform("void f() { gValue * 2; }", true);
        assert!(result.is_ok());
        assert_eq!(t.records()[0].expected, None);
        assert_eq!(t.records()[0].template, "gValue * 2");
    }

    #[test]
    fn call_arguments_take_parameter_types() {
        let (_, t, result) =
            transform("double sq(double x) { return x * x; } void f() { sq(gValue); }", true);
        assert!(result.is_ok());
        assert_eq!(t.records()[0].expected, Some(CType::Double));
    }

    #[test]
    fn missing_runtime_reports_undeclared_identifier() {
        let (_, _, result) = transform("void f() { int x = gValue; }", false);
        let errors = result.unwrap_err();
        assert_eq!(errors[0].message, "use of undeclared identifier 'gValue'");
    }
}
