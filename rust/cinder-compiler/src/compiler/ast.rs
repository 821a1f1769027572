//! AST node types for the C subset.
//!
//! The parser fills in syntax; semantic analysis annotates the same nodes in
//! place (expression types, name bindings, frame slots, resolved declaration
//! types).

use crate::compiler::lir::Builtin;
use crate::compiler::tokens::{IntSuffix, Span};
use crate::compiler::types::{CType, IntRank, RecordId};

/// Statement identifier, unique within one parse.
pub type NodeId = u32;

// ── Declaration specifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    None,
    Static,
    Extern,
    Typedef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Struct,
    Class,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaseType {
    Void,
    Bool,
    Int { rank: IntRank, signed: bool },
    Float,
    Double,
    Auto,
    /// Typedef name or record tag used as a type name.
    Named(String),
    Record { kind: RecordKind, name: String },
    Enum(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclSpec {
    pub base: BaseType,
    pub storage: Storage,
    pub is_const: bool,
    pub is_inline: bool,
    pub extern_c: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub spec: DeclSpec,
    pub declarator: Declarator,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Suffix {
    Array(Option<Expr>),
    Function { params: Vec<ParamDecl>, variadic: bool },
}

/// `**name[2][3]` style declarator. Suffixes are in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: Option<String>,
    pub pointers: usize,
    pub suffixes: Vec<Suffix>,
    pub span: Span,
}

impl Declarator {
    pub fn is_function(&self) -> bool {
        matches!(self.suffixes.first(), Some(Suffix::Function { .. }))
    }

    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// Type written in a cast or `sizeof`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub spec: DeclSpec,
    pub declarator: Declarator,
    pub resolved: CType,
}

// ── Declarations ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    Expr(Expr),
    List(Vec<Initializer>, Span),
    /// `T x(args)`
    Construct(Vec<Expr>, Span),
}

impl Initializer {
    pub fn span(&self) -> Span {
        match self {
            Initializer::Expr(e) => e.span,
            Initializer::List(_, span) | Initializer::Construct(_, span) => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStorage {
    Global,
    Local { slot: u32 },
    /// Function-local static, stored as a hidden global.
    Static,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub declarator: Declarator,
    pub init: Option<Initializer>,
    // Filled in by sema.
    pub ty: CType,
    pub storage: VarStorage,
    pub link_name: String,
    pub is_extern: bool,
    pub constant_init: Option<Vec<(u64, crate::compiler::sema::Constant)>>,
}

impl VarDecl {
    pub fn is_definition(&self) -> bool {
        !self.is_extern || self.init.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub ty: CType,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub declarator: Declarator,
    pub body: Option<Stmt>,
    pub extern_c: bool,
    // Filled in by sema.
    pub ret: CType,
    pub params: Vec<Param>,
    pub variadic: bool,
    pub frame_slots: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub spec: DeclSpec,
    pub declarators: Vec<Declarator>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordDecl {
    pub kind: RecordKind,
    pub name: String,
    /// `None` for a forward declaration.
    pub fields: Option<Vec<FieldDecl>>,
    pub id: Option<RecordId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enumerator {
    pub name: String,
    pub value: Option<Expr>,
    pub resolved: i64,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: Option<String>,
    pub variants: Vec<Enumerator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedefDecl {
    pub name: String,
    pub declarator: Declarator,
    pub ty: CType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Var(VarDecl),
    Function(FunctionDecl),
    Record(RecordDecl),
    Enum(EnumDecl),
    Typedef(TypedefDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub kind: DeclKind,
    /// Own source range: the declarator (with initializer), or the
    /// `struct`/`enum` body for type definitions.
    pub span: Span,
}

impl Decl {
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            DeclKind::Var(v) => Some(&v.name),
            DeclKind::Function(f) => Some(&f.name),
            DeclKind::Record(r) => Some(&r.name),
            DeclKind::Enum(e) => e.name.as_deref(),
            DeclKind::Typedef(t) => Some(&t.name),
        }
    }

    pub fn as_var(&self) -> Option<&VarDecl> {
        match &self.kind {
            DeclKind::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionDecl> {
        match &self.kind {
            DeclKind::Function(f) => Some(f),
            _ => None,
        }
    }
}

/// All declarators sharing one specifier list, e.g. `int a = 1, *b;`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclGroup {
    pub spec: DeclSpec,
    pub decls: Vec<Decl>,
    /// Whole group, including the terminating `;` when present.
    pub span: Span,
}

impl DeclGroup {
    pub fn is_function_definition(&self) -> bool {
        self.decls.iter().any(|d| matches!(&d.kind, DeclKind::Function(f) if f.body.is_some()))
    }
}

// ── Statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Null,
    Expr(Expr),
    Decl(DeclGroup),
    Compound(Vec<Stmt>),
    If { cond: Expr, then: Box<Stmt>, els: Option<Box<Stmt>> },
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    For { init: Option<Box<Stmt>>, cond: Option<Expr>, step: Option<Expr>, body: Box<Stmt> },
    Break,
    Continue,
    Return(Option<Expr>),
}

// ── Expressions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    /// Binding power; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 3,
            BinOp::And => 4,
            BinOp::BitOr => 5,
            BinOp::BitXor => 6,
            BinOp::BitAnd => 7,
            BinOp::Eq | BinOp::Ne => 8,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 9,
            BinOp::Shl | BinOp::Shr => 10,
            BinOp::Add | BinOp::Sub => 11,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 12,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

/// What an identifier refers to after name lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Unresolved,
    Local { slot: u32 },
    Global { link_name: String },
    Function,
    EnumConst(i64),
    Builtin(Builtin),
    /// Stand-in for a name that will be looked up at run time.
    Placeholder,
}

impl Binding {
    pub fn is_variable(&self) -> bool {
        matches!(self, Binding::Local { .. } | Binding::Global { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntLit(u64, IntSuffix),
    FloatLit(f64, bool),
    CharLit(i64),
    StrLit(String),
    BoolLit(bool),
    Null,
    Ident(String, Binding),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `lhs op= rhs`; `None` for plain assignment.
    Assign(Option<BinOp>, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Member { base: Box<Expr>, field: String, arrow: bool },
    Cast(Box<TypeName>, Box<Expr>),
    SizeofType(Box<TypeName>),
    SizeofExpr(Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: CType,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span, ty: CType::Void }
    }

    pub fn typed(kind: ExprKind, span: Span, ty: CType) -> Self {
        Self { kind, span, ty }
    }

    /// Visits direct children.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Unary(_, e)
            | ExprKind::SizeofExpr(e)
            | ExprKind::Cast(_, e)
            | ExprKind::Member { base: e, .. } => vec![e],
            ExprKind::Binary(_, a, b)
            | ExprKind::Assign(_, a, b)
            | ExprKind::Index(a, b)
            | ExprKind::Comma(a, b) => vec![a, b],
            ExprKind::Conditional(a, b, c) => vec![a, b, c],
            ExprKind::Call(callee, args) => {
                let mut out: Vec<&Expr> = vec![callee];
                out.extend(args.iter());
                out
            }
            _ => Vec::new(),
        }
    }
}
