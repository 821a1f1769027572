//! Statement rewriter.
//!
//! Turns the statements of one interactive input into a translation unit:
//! declarations are hoisted to global scope so they outlive the input, and
//! everything that has to run goes into a freshly named entry function. The
//! last expression of the input may be wrapped for value printing.

use std::collections::HashSet;

use thiserror::Error;

use crate::compiler::ast::*;
use crate::compiler::printer::Printer;
use crate::compiler::source::SourceManager;
use crate::compiler::tokens::Span;
use crate::compiler::types::{CType, TypeTable};
use crate::ValuePrinting;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RewriteError {
    #[error("no source text for statement at line {}", .0.line)]
    MissingSource(Span),
}

pub struct RewriteContext<'a> {
    pub sources: &'a SourceManager,
    pub types: &'a TypeTable,
    /// Statements changed after parsing; printed from their trees.
    pub dirty: &'a HashSet<NodeId>,
    pub value_printing: ValuePrinting,
    /// The raw input ended with `;`.
    pub has_semicolon: bool,
    pub entry_name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedInput {
    pub globals: Vec<String>,
    pub body: Vec<String>,
    pub final_stmt: Option<String>,
    /// Name of the entry function, `None` when nothing needs to run.
    pub entry: Option<String>,
}

impl WrappedInput {
    /// The translation unit as source text.
    pub fn source(&self) -> String {
        let mut out = String::new();
        for global in &self.globals {
            out.push_str(global);
            out.push('\n');
        }
        if let Some(entry) = &self.entry {
            out.push_str(&format!("extern \"C\" void {}() {{\n", entry));
            for line in &self.body {
                out.push_str(line);
                out.push('\n');
            }
            if let Some(last) = &self.final_stmt {
                out.push_str(last);
                out.push('\n');
            }
            out.push_str("}\n");
        }
        out
    }
}

enum Candidate {
    /// Expression without its `;`, and whether it has a printable value.
    Expr { text: String, printable: bool },
    Stmt(String),
}

impl Candidate {
    fn into_stmt(self) -> String {
        match self {
            Candidate::Expr { text, .. } => format!("{};", text),
            Candidate::Stmt(text) => text,
        }
    }
}

struct Rewriter<'a> {
    ctx: &'a RewriteContext<'a>,
    printer: Printer<'a>,
    globals: Vec<String>,
    body: Vec<String>,
    candidate: Option<Candidate>,
}

/// Rewrites the statements of one input.
pub fn rewrite(stmts: &[Stmt], ctx: &RewriteContext<'_>) -> Result<WrappedInput, RewriteError> {
    let mut rw = Rewriter {
        ctx,
        printer: Printer::new(ctx.types),
        globals: Vec::new(),
        body: Vec::new(),
        candidate: None,
    };
    for stmt in stmts {
        rw.stmt(stmt)?;
    }

    let final_stmt = rw.candidate.take().map(|c| match c {
        Candidate::Expr { text, printable } if printable && rw.should_print() => {
            format!("__cinder_print_value({});", text)
        }
        other => other.into_stmt(),
    });
    let entry = if final_stmt.is_none() && rw.body.is_empty() {
        None
    } else {
        Some(ctx.entry_name.to_string())
    };
    Ok(WrappedInput { globals: rw.globals, body: rw.body, final_stmt, entry })
}

impl<'a> Rewriter<'a> {
    fn should_print(&self) -> bool {
        match self.ctx.value_printing {
            ValuePrinting::Enabled => true,
            ValuePrinting::Disabled => false,
            ValuePrinting::Auto => !self.ctx.has_semicolon,
        }
    }

    fn flush(&mut self) {
        if let Some(c) = self.candidate.take() {
            self.body.push(c.into_stmt());
        }
    }

    fn set_candidate(&mut self, c: Candidate) {
        self.flush();
        self.candidate = Some(c);
    }

    fn slice(&self, span: Span) -> Result<String, RewriteError> {
        self.ctx.sources.slice(span).map(str::to_string).ok_or(RewriteError::MissingSource(span))
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), RewriteError> {
        let dirty = self.ctx.dirty.contains(&stmt.id);
        match &stmt.kind {
            StmtKind::Null => Ok(()),
            StmtKind::Expr(e) => {
                let text = if dirty { self.printer.expr(e) } else { self.slice(e.span)? };
                self.set_candidate(Candidate::Expr { text, printable: !e.ty.is_void() });
                Ok(())
            }
            StmtKind::Decl(group) => {
                self.flush();
                self.decl_group(group, dirty)
            }
            _ => {
                let text = if dirty { self.printer.stmt(stmt, 0) } else { self.slice(stmt.span)? };
                self.set_candidate(Candidate::Stmt(text));
                Ok(())
            }
        }
    }

    fn decl_group(&mut self, group: &DeclGroup, dirty: bool) -> Result<(), RewriteError> {
        if let [decl] = group.decls.as_slice() {
            if !matches!(decl.kind, DeclKind::Var(_)) {
                let text = if dirty { self.printer.group(group) } else { self.slice(group.span)? };
                self.globals.push(text);
                return Ok(());
            }
        }
        for decl in &group.decls {
            match &decl.kind {
                DeclKind::Record(_) | DeclKind::Enum(_) => {
                    let text = if dirty {
                        self.printer.decl(&group.spec, decl)
                    } else {
                        self.slice(decl.span)?
                    };
                    self.globals.push(format!("{};", text));
                }
                DeclKind::Function(_) | DeclKind::Typedef(_) => {
                    self.globals.push(format!("{};", self.printer.decl(&group.spec, decl)));
                }
                DeclKind::Var(v) => self.var(v, dirty)?,
            }
        }
        Ok(())
    }

    fn var(&mut self, v: &VarDecl, dirty: bool) -> Result<(), RewriteError> {
        let mut head = self.ctx.types.declare(&v.ty, &v.name);
        if v.is_extern {
            head = format!("extern {}", head);
        }
        let constant = v.constant_init.is_some() && !dirty;
        match &v.init {
            None => self.globals.push(format!("{};", head)),
            Some(Initializer::Construct(args, _)) if args.is_empty() => {
                self.globals.push(format!("{};", head))
            }
            Some(init @ Initializer::Construct(_, span)) => {
                let args = if dirty { self.printer.initializer(init) } else { self.slice(*span)? };
                self.globals.push(format!("{}{};", head, args));
            }
            Some(Initializer::Expr(e)) => {
                let value = self.expr_text(e, dirty)?;
                if constant {
                    self.globals.push(format!("{} = {};", head, value));
                } else {
                    self.globals.push(format!("{};", head));
                    self.assign(v.name.clone(), value);
                }
            }
            Some(init @ Initializer::List(..)) => {
                self.globals.push(format!("{};", head));
                self.list_assignments(&v.name, &v.ty, init, dirty)?;
            }
        }
        Ok(())
    }

    /// Element-wise assignments for a brace initializer.
    fn list_assignments(
        &mut self,
        target: &str,
        ty: &CType,
        init: &Initializer,
        dirty: bool,
    ) -> Result<(), RewriteError> {
        match init {
            Initializer::List(items, _) => match ty {
                CType::Array(elem, _) => {
                    for (j, item) in items.iter().enumerate() {
                        self.list_assignments(&format!("{}[{}]", target, j), elem, item, dirty)?;
                    }
                }
                CType::Record(id) => {
                    let fields =
                        self.ctx.types.record(*id).map(|r| r.fields.clone()).unwrap_or_default();
                    for (field, item) in fields.iter().zip(items) {
                        let member = format!("{}.{}", target, field.name);
                        self.list_assignments(&member, &field.ty, item, dirty)?;
                    }
                }
                _ => {
                    if let Some(first) = items.first() {
                        self.list_assignments(target, ty, first, dirty)?;
                    }
                }
            },
            Initializer::Expr(e) => {
                let value = self.expr_text(e, dirty)?;
                self.assign(target.to_string(), value);
            }
            Initializer::Construct(args, _) => {
                if let Some(arg) = args.first() {
                    let value = self.expr_text(arg, dirty)?;
                    self.assign(target.to_string(), value);
                }
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: String, value: String) {
        let text = format!("{} = {}", target, value);
        self.set_candidate(Candidate::Expr { text, printable: true });
    }

    fn expr_text(&self, e: &Expr, dirty: bool) -> Result<String, RewriteError> {
        if dirty {
            Ok(self.printer.expr(e))
        } else {
            self.slice(e.span)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;
    use crate::compiler::sema::Sema;

    fn wrap(input: &str, mode: ValuePrinting) -> WrappedInput {
        let src = format!("void __cinder_stmt_vs_decl_0() {{\n{}\n;}}", input);
        let mut sources = SourceManager::new();
        let id = sources.add_fragment("input_line_0", &src).unwrap();
        let frag = sources.fragment(id).unwrap().clone();
        let tokens = Lexer::new(&src, frag.file, frag.range.start).tokenize().unwrap();
        let mut sema = Sema::new();
        let mut parser = Parser::new(tokens, sema.type_names());
        let mut group = parser.parse_top_level().unwrap().unwrap();
        sema.analyze_top_level(&mut group).unwrap();
        let f = group.decls[0].as_function().unwrap();
        let Some(Stmt { kind: StmtKind::Compound(stmts), .. }) = &f.body else { panic!() };
        let dirty = HashSet::new();
        let ctx = RewriteContext {
            sources: &sources,
            types: sema.types(),
            dirty: &dirty,
            value_printing: mode,
            has_semicolon: input.trim_end().ends_with(';'),
            entry_name: "__cinder_input_line_1",
        };
        rewrite(stmts, &ctx).unwrap()
    }

    #[test]
    fn hoists_constant_declarations() {
        let w = wrap("int x = 5;", ValuePrinting::Auto);
        assert_eq!(w.globals, vec!["int x = 5;".to_string()]);
        assert_eq!(w.entry, None);
        assert_eq!(w.source(), "int x = 5;\n");
    }

    #[test]
    fn final_expression_is_printed_without_semicolon() {
        let w = wrap("2 + 2", ValuePrinting::Auto);
        assert_eq!(w.final_stmt.as_deref(), Some("__cinder_print_value(2 + 2);"));
        let w = wrap("2 + 2;", ValuePrinting::Auto);
        assert_eq!(w.final_stmt.as_deref(), Some("2 + 2;"));
        let w = wrap("2 + 2;", ValuePrinting::Enabled);
        assert_eq!(w.final_stmt.as_deref(), Some("__cinder_print_value(2 + 2);"));
        let w = wrap("2 + 2", ValuePrinting::Disabled);
        assert_eq!(w.final_stmt.as_deref(), Some("2 + 2;"));
    }

    #[test]
    fn list_initializers_become_element_assignments() {
        let w = wrap("int a[3] = {1, 2, 3}", ValuePrinting::Disabled);
        assert_eq!(w.globals, vec!["int a[3];".to_string()]);
        assert_eq!(w.body, vec!["a[0] = 1;".to_string(), "a[1] = 2;".to_string()]);
        assert_eq!(w.final_stmt.as_deref(), Some("a[2] = 3;"));
    }

    #[test]
    fn non_constant_initializers_run_in_order() {
        let w = wrap("int a = 1; int b = a + 1; b * 2", ValuePrinting::Auto);
        assert_eq!(w.globals, vec!["int a = 1;".to_string(), "int b;".to_string()]);
        assert_eq!(w.body, vec!["b = a + 1;".to_string()]);
        assert_eq!(w.final_stmt.as_deref(), Some("__cinder_print_value(b * 2);"));
        assert_eq!(w.entry.as_deref(), Some("__cinder_input_line_1"));
    }

    #[test]
    fn constructor_initializers_stay_on_the_global() {
        let w = wrap("int n(7);", ValuePrinting::Auto);
        assert_eq!(w.globals[0], "int n(7);");
        assert_eq!(w.entry, None);
    }

    #[test]
    fn type_definitions_and_statements() {
        let w = wrap("struct P { int x; }; for (int i = 0; i < 2; ++i) {}", ValuePrinting::Auto);
        assert_eq!(w.globals, vec!["struct P { int x; };".to_string()]);
        assert_eq!(w.final_stmt.as_deref(), Some("for (int i = 0; i < 2; ++i) {}"));
    }
}
