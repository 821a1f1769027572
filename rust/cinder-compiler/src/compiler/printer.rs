//! Prints analysed AST back to C source.
//!
//! Used wherever a tree was rewritten and the original text no longer
//! matches it, and to build the templates for run-time evaluation.

use crate::compiler::ast::*;
use crate::compiler::tokens::IntSuffix;
use crate::compiler::types::TypeTable;

const PREC_COMMA: u8 = 0;
const PREC_ASSIGN: u8 = 1;
const PREC_COND: u8 = 2;
const PREC_UNARY: u8 = 13;
const PREC_POSTFIX: u8 = 14;
const PREC_PRIMARY: u8 = 15;

/// Replacement text for an identifier, if any.
pub type IdentOverride<'a> = &'a dyn Fn(&Expr) -> Option<String>;

pub struct Printer<'a> {
    types: &'a TypeTable,
    ident_override: Option<IdentOverride<'a>>,
}

impl<'a> Printer<'a> {
    pub fn new(types: &'a TypeTable) -> Self {
        Self { types, ident_override: None }
    }

    pub fn with_ident_override(mut self, f: IdentOverride<'a>) -> Self {
        self.ident_override = Some(f);
        self
    }

    // ── Expressions ──

    pub fn expr(&self, e: &Expr) -> String {
        self.expr_prec(e, PREC_COMMA)
    }

    fn expr_prec(&self, e: &Expr, min: u8) -> String {
        let (text, prec) = self.expr_inner(e);
        if prec < min {
            format!("({})", text)
        } else {
            text
        }
    }

    fn expr_inner(&self, e: &Expr) -> (String, u8) {
        match &e.kind {
            ExprKind::IntLit(v, suffix) => {
                let suffix = match suffix {
                    IntSuffix::None => "",
                    IntSuffix::U => "u",
                    IntSuffix::L => "l",
                    IntSuffix::UL => "ul",
                    IntSuffix::LL => "ll",
                    IntSuffix::ULL => "ull",
                };
                (format!("{}{}", v, suffix), PREC_PRIMARY)
            }
            ExprKind::FloatLit(v, single) => {
                let text = format!("{:?}{}", v, if *single { "f" } else { "" });
                (text, PREC_PRIMARY)
            }
            ExprKind::CharLit(c) => (char_literal(*c), PREC_PRIMARY),
            ExprKind::StrLit(s) => (string_literal(s), PREC_PRIMARY),
            ExprKind::BoolLit(b) => (b.to_string(), PREC_PRIMARY),
            ExprKind::Null => ("nullptr".to_string(), PREC_PRIMARY),
            ExprKind::Ident(name, _) => {
                if let Some(text) = self.ident_override.and_then(|f| f(e)) {
                    return (text, PREC_PRIMARY);
                }
                (name.clone(), PREC_PRIMARY)
            }
            ExprKind::Unary(op, operand) => match op {
                UnaryOp::PostInc => {
                    (format!("{}++", self.expr_prec(operand, PREC_POSTFIX)), PREC_POSTFIX)
                }
                UnaryOp::PostDec => {
                    (format!("{}--", self.expr_prec(operand, PREC_POSTFIX)), PREC_POSTFIX)
                }
                _ => {
                    let symbol = match op {
                        UnaryOp::Neg => "-",
                        UnaryOp::Plus => "+",
                        UnaryOp::Not => "!",
                        UnaryOp::BitNot => "~",
                        UnaryOp::Deref => "*",
                        UnaryOp::AddrOf => "&",
                        UnaryOp::PreInc => "++",
                        _ => "--",
                    };
                    let inner = self.expr_prec(operand, PREC_UNARY);
                    let glued = matches!(symbol, "-" | "+" | "++" | "--" | "&")
                        && inner.starts_with(&symbol[..1]);
                    let sep = if glued { " " } else { "" };
                    (format!("{}{}{}", symbol, sep, inner), PREC_UNARY)
                }
            },
            ExprKind::Binary(op, lhs, rhs) => {
                let p = op.precedence();
                let text = format!(
                    "{} {} {}",
                    self.expr_prec(lhs, p),
                    op.symbol(),
                    self.expr_prec(rhs, p + 1)
                );
                (text, p)
            }
            ExprKind::Assign(op, lhs, rhs) => {
                let symbol = op.map(|o| format!("{}=", o.symbol())).unwrap_or_else(|| "=".into());
                let text = format!(
                    "{} {} {}",
                    self.expr_prec(lhs, PREC_UNARY),
                    symbol,
                    self.expr_prec(rhs, PREC_ASSIGN)
                );
                (text, PREC_ASSIGN)
            }
            ExprKind::Conditional(cond, then, els) => {
                let text = format!(
                    "{} ? {} : {}",
                    self.expr_prec(cond, PREC_COND + 1),
                    self.expr_prec(then, PREC_COMMA),
                    self.expr_prec(els, PREC_COND)
                );
                (text, PREC_COND)
            }
            ExprKind::Call(callee, args) => {
                let args: Vec<String> =
                    args.iter().map(|a| self.expr_prec(a, PREC_ASSIGN)).collect();
                let callee = self.expr_prec(callee, PREC_POSTFIX);
                (format!("{}({})", callee, args.join(", ")), PREC_POSTFIX)
            }
            ExprKind::Index(base, index) => {
                let base = self.expr_prec(base, PREC_POSTFIX);
                (format!("{}[{}]", base, self.expr(index)), PREC_POSTFIX)
            }
            ExprKind::Member { base, field, arrow } => {
                let op = if *arrow { "->" } else { "." };
                (format!("{}{}{}", self.expr_prec(base, PREC_POSTFIX), op, field), PREC_POSTFIX)
            }
            ExprKind::Cast(target, operand) => {
                let text = format!(
                    "({}){}",
                    self.types.name(&target.resolved),
                    self.expr_prec(operand, PREC_UNARY)
                );
                (text, PREC_UNARY)
            }
            ExprKind::SizeofType(target) => {
                (format!("sizeof({})", self.types.name(&target.resolved)), PREC_UNARY)
            }
            ExprKind::SizeofExpr(operand) => {
                (format!("sizeof({})", self.expr(operand)), PREC_UNARY)
            }
            ExprKind::Comma(lhs, rhs) => {
                let text = format!(
                    "{}, {}",
                    self.expr_prec(lhs, PREC_COMMA),
                    self.expr_prec(rhs, PREC_ASSIGN)
                );
                (text, PREC_COMMA)
            }
        }
    }

    pub fn initializer(&self, init: &Initializer) -> String {
        match init {
            Initializer::Expr(e) => self.expr_prec(e, PREC_ASSIGN),
            Initializer::List(items, _) => {
                let items: Vec<String> = items.iter().map(|i| self.initializer(i)).collect();
                if items.is_empty() {
                    "{}".to_string()
                } else {
                    format!("{{ {} }}", items.join(", "))
                }
            }
            Initializer::Construct(args, _) => {
                let args: Vec<String> =
                    args.iter().map(|a| self.expr_prec(a, PREC_ASSIGN)).collect();
                format!("({})", args.join(", "))
            }
        }
    }

    // ── Declarations ──

    /// One declaration from its resolved types, without the trailing `;`.
    pub fn decl(&self, spec: &DeclSpec, decl: &Decl) -> String {
        match &decl.kind {
            DeclKind::Var(v) => {
                let mut out = String::new();
                if v.is_extern {
                    out.push_str("extern ");
                } else if v.storage == VarStorage::Static {
                    out.push_str("static ");
                }
                out.push_str(&self.types.declare(&v.ty, &v.name));
                match &v.init {
                    Some(init @ Initializer::Construct(..)) => {
                        out.push_str(&self.initializer(init))
                    }
                    Some(init) => {
                        out.push_str(" = ");
                        out.push_str(&self.initializer(init));
                    }
                    None => {}
                }
                out
            }
            DeclKind::Function(f) => self.prototype(spec, f),
            DeclKind::Record(r) => {
                let keyword = match r.kind {
                    RecordKind::Struct => "struct",
                    RecordKind::Class => "class",
                };
                let def = r.id.and_then(|id| self.types.record(id));
                match (def, &r.fields) {
                    (Some(def), Some(_)) => {
                        let fields: Vec<String> = def
                            .fields
                            .iter()
                            .map(|f| format!("{};", self.types.declare(&f.ty, &f.name)))
                            .collect();
                        let access = if r.kind == RecordKind::Class { "public: " } else { "" };
                        format!("{} {} {{ {}{} }}", keyword, r.name, access, fields.join(" "))
                    }
                    _ => format!("{} {}", keyword, r.name),
                }
            }
            DeclKind::Enum(e) => {
                let variants: Vec<String> =
                    e.variants.iter().map(|v| format!("{} = {}", v.name, v.resolved)).collect();
                match &e.name {
                    Some(name) => format!("enum {} {{ {} }}", name, variants.join(", ")),
                    None => format!("enum {{ {} }}", variants.join(", ")),
                }
            }
            DeclKind::Typedef(t) => format!("typedef {}", self.types.declare(&t.ty, &t.name)),
        }
    }

    /// `int add(int a, int b)` from a resolved function declaration.
    pub fn prototype(&self, spec: &DeclSpec, f: &FunctionDecl) -> String {
        let mut params: Vec<String> = f
            .params
            .iter()
            .map(|p| self.types.declare(&p.ty, p.name.as_deref().unwrap_or("")))
            .collect();
        if f.variadic {
            params.push("...".to_string());
        }
        let head = self.types.declare(&f.ret, &format!("{}({})", f.name, params.join(", ")));
        let mut out = String::new();
        if spec.extern_c || f.extern_c {
            out.push_str("extern \"C\" ");
        }
        if spec.storage == Storage::Static {
            out.push_str("static ");
        }
        if spec.is_inline {
            out.push_str("inline ");
        }
        out.push_str(&head);
        out
    }

    pub fn group(&self, group: &DeclGroup) -> String {
        let mut parts = Vec::new();
        for decl in &group.decls {
            match &decl.kind {
                DeclKind::Function(f) if f.body.is_some() => {
                    let body = f.body.as_ref().map(|b| self.stmt(b, 0)).unwrap_or_default();
                    parts.push(format!("{} {}", self.prototype(&group.spec, f), body));
                }
                _ => parts.push(format!("{};", self.decl(&group.spec, decl))),
            }
        }
        parts.join(" ")
    }

    // ── Statements ──

    pub fn stmt(&self, s: &Stmt, indent: usize) -> String {
        let pad = "    ".repeat(indent);
        match &s.kind {
            StmtKind::Null => ";".to_string(),
            StmtKind::Expr(e) => format!("{};", self.expr(e)),
            StmtKind::Decl(group) => self.group(group),
            StmtKind::Compound(stmts) => {
                let mut out = String::from("{\n");
                for stmt in stmts {
                    out.push_str(&"    ".repeat(indent + 1));
                    out.push_str(&self.stmt(stmt, indent + 1));
                    out.push('\n');
                }
                out.push_str(&pad);
                out.push('}');
                out
            }
            StmtKind::If { cond, then, els } => {
                let mut out = format!("if ({}) {}", self.expr(cond), self.stmt(then, indent));
                if let Some(els) = els {
                    out.push_str(" else ");
                    out.push_str(&self.stmt(els, indent));
                }
                out
            }
            StmtKind::While { cond, body } => {
                format!("while ({}) {}", self.expr(cond), self.stmt(body, indent))
            }
            StmtKind::DoWhile { body, cond } => {
                format!("do {} while ({});", self.stmt(body, indent), self.expr(cond))
            }
            StmtKind::For { init, cond, step, body } => {
                let init =
                    init.as_ref().map(|s| self.stmt(s, indent)).unwrap_or_else(|| ";".to_string());
                let cond = cond.as_ref().map(|c| self.expr(c)).unwrap_or_default();
                let step = step.as_ref().map(|c| self.expr(c)).unwrap_or_default();
                format!("for ({} {}; {}) {}", init, cond, step, self.stmt(body, indent))
            }
            StmtKind::Break => "break;".to_string(),
            StmtKind::Continue => "continue;".to_string(),
            StmtKind::Return(Some(e)) => format!("return {};", self.expr(e)),
            StmtKind::Return(None) => "return;".to_string(),
        }
    }
}

fn escape_char(c: char, quote: char, out: &mut String) {
    match c {
        '\n' => out.push_str("\\n"),
        '\t' => out.push_str("\\t"),
        '\r' => out.push_str("\\r"),
        '\\' => out.push_str("\\\\"),
        c if c == quote => {
            out.push('\\');
            out.push(c);
        }
        c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\{:03o}", c as u32)),
        c => out.push(c),
    }
}

pub fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        escape_char(c, '"', &mut out);
    }
    out.push('"');
    out
}

pub fn char_literal(value: i64) -> String {
    let mut out = String::from("'");
    match char::from_u32((value & 0xff) as u32) {
        Some(c) if c.is_ascii() => escape_char(c, '\'', &mut out),
        _ => out.push_str(&format!("\\{:03o}", value & 0xff)),
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;
    use crate::compiler::sema::Sema;
    use std::collections::HashSet;

    fn print_stmt_of(body: &str) -> String {
        let src = format!("void f(int a, int b, int *p) {{ {} }}", body);
        let tokens = Lexer::new(&src, 0, 0).tokenize().unwrap();
        let mut parser = Parser::new(tokens, HashSet::new());
        let mut group = parser.parse_top_level().unwrap().unwrap();
        let mut sema = Sema::new();
        sema.analyze_top_level(&mut group).unwrap();
        let f = group.decls[0].as_function().unwrap();
        let Some(Stmt { kind: StmtKind::Compound(stmts), .. }) = &f.body else { panic!() };
        Printer::new(sema.types()).stmt(&stmts[0], 0)
    }

    #[test]
    fn keeps_required_parentheses() {
        assert_eq!(print_stmt_of("(a + b) * 2;"), "(a + b) * 2;");
        assert_eq!(print_stmt_of("a - (b - 1);"), "a - (b - 1);");
        assert_eq!(print_stmt_of("a = b = 3;"), "a = b = 3;");
        assert_eq!(print_stmt_of("*p++ = -(-a);"), "*p++ = - -a;");
    }

    #[test]
    fn prints_literals_and_casts() {
        assert_eq!(print_stmt_of("a = (int)2.5f;"), "a = (int)2.5f;");
        assert_eq!(print_stmt_of("p = (int *)0;"), "p = (int *)0;");
        assert_eq!(string_literal("a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(char_literal('\'' as i64), "'\\''");
        assert_eq!(char_literal(1), "'\\001'");
    }

    #[test]
    fn prints_declarations_from_resolved_types() {
        assert_eq!(print_stmt_of("int m[2][3], *q = p;"), "int m[2][3]; int *q = p;");
        assert_eq!(print_stmt_of("if (a < b) a = b; else b = a;"), "if (a < b) a = b; else b = a;");
    }

    #[test]
    fn ident_override_replaces_names() {
        let src = "int g; int h = g + 1;";
        let tokens = Lexer::new(src, 0, 0).tokenize().unwrap();
        let mut parser = Parser::new(tokens, HashSet::new());
        let mut sema = Sema::new();
        let mut g = parser.parse_top_level().unwrap().unwrap();
        sema.analyze_top_level(&mut g).unwrap();
        let mut h = parser.parse_top_level().unwrap().unwrap();
        sema.analyze_top_level(&mut h).unwrap();
        let init = match &h.decls[0].as_var().unwrap().init {
            Some(Initializer::Expr(e)) => e.clone(),
            _ => panic!(),
        };
        let replace = |e: &Expr| match &e.kind {
            ExprKind::Ident(name, _) if name == "g" => Some("(*(int *)@)".to_string()),
            _ => None,
        };
        let printer = Printer::new(sema.types()).with_ident_override(&replace);
        assert_eq!(printer.expr(&init), "(*(int *)@) + 1");
    }
}
