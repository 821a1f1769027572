use serde::{Deserialize, Serialize};
use std::fmt;

/// Location of a token or node inside a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Buffer (file id) holding the text
    pub file: u32,
    /// Byte offset of the start in the buffer
    pub start: usize,
    /// Byte offset of the end (exclusive) in the buffer
    pub end: usize,
    /// 1-based line number inside the fragment
    pub line: usize,
    /// 1-based column number
    pub col: usize,
}

impl Span {
    pub fn new(file: u32, start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { file, start, end, line, col }
    }

    pub fn dummy() -> Self {
        Self { file: u32::MAX, start: 0, end: 0, line: 0, col: 0 }
    }

    pub fn is_dummy(&self) -> bool {
        self.file == u32::MAX
    }

    pub fn merge(self, other: Span) -> Span {
        if self.is_dummy() {
            return other;
        }
        if other.is_dummy() || other.file != self.file {
            return self;
        }
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
            col: if self.start <= other.start { self.col } else { other.col },
        }
    }

    pub fn contains(&self, other: Span) -> bool {
        self.file == other.file && self.start <= other.start && other.end <= self.end
    }
}

/// Suffix of an integer literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntSuffix {
    None,
    U,
    L,
    UL,
    LL,
    ULL,
}

/// Preprocessing directive kept as a single token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    Include { path: String, angled: bool },
    Pragma(String),
}

/// Token types for the C subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    IntLit(u64, IntSuffix),
    FloatLit(f64, bool),
    CharLit(i64),
    StringLit(String),

    Ident(String),

    // Type keywords
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Signed,
    Unsigned,
    Auto,

    // Qualifiers and storage
    Const,
    Volatile,
    Static,
    Extern,
    Inline,
    Register,

    // Aggregates
    Struct,
    Class,
    Union,
    Enum,
    Typedef,
    Public,
    Private,

    // Statements
    If,
    Else,
    While,
    Do,
    For,
    Break,
    Continue,
    Return,
    Switch,
    Case,
    Default,
    Goto,

    // Expression keywords
    Sizeof,
    True,
    False,
    Nullptr,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Arrow,
    Question,
    Colon,
    Ellipsis,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
    Shl,
    Shr,
    PlusPlus,
    MinusMinus,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,

    Directive(Directive),
    Eof,
}

impl TokenKind {
    pub fn keyword(word: &str) -> Option<TokenKind> {
        Some(match word {
            "void" => TokenKind::Void,
            "bool" | "_Bool" => TokenKind::Bool,
            "char" => TokenKind::Char,
            "short" => TokenKind::Short,
            "int" => TokenKind::Int,
            "long" => TokenKind::Long,
            "float" => TokenKind::Float,
            "double" => TokenKind::Double,
            "signed" => TokenKind::Signed,
            "unsigned" => TokenKind::Unsigned,
            "auto" => TokenKind::Auto,
            "const" => TokenKind::Const,
            "volatile" => TokenKind::Volatile,
            "static" => TokenKind::Static,
            "extern" => TokenKind::Extern,
            "inline" => TokenKind::Inline,
            "register" => TokenKind::Register,
            "struct" => TokenKind::Struct,
            "class" => TokenKind::Class,
            "union" => TokenKind::Union,
            "enum" => TokenKind::Enum,
            "typedef" => TokenKind::Typedef,
            "public" => TokenKind::Public,
            "private" => TokenKind::Private,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "for" => TokenKind::For,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "goto" => TokenKind::Goto,
            "sizeof" => TokenKind::Sizeof,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nullptr" | "NULL" => TokenKind::Nullptr,
            _ => return None,
        })
    }

    /// Tokens that may begin a declaration specifier list.
    pub fn starts_type(&self) -> bool {
        matches!(
            self,
            TokenKind::Void
                | TokenKind::Bool
                | TokenKind::Char
                | TokenKind::Short
                | TokenKind::Int
                | TokenKind::Long
                | TokenKind::Float
                | TokenKind::Double
                | TokenKind::Signed
                | TokenKind::Unsigned
                | TokenKind::Auto
                | TokenKind::Const
                | TokenKind::Volatile
                | TokenKind::Static
                | TokenKind::Extern
                | TokenKind::Inline
                | TokenKind::Register
                | TokenKind::Struct
                | TokenKind::Class
                | TokenKind::Union
                | TokenKind::Enum
                | TokenKind::Typedef
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::IntLit(v, _) => return write!(f, "{}", v),
            TokenKind::FloatLit(v, _) => return write!(f, "{}", v),
            TokenKind::CharLit(c) => return write!(f, "character literal {}", c),
            TokenKind::StringLit(s) => return write!(f, "\"{}\"", s),
            TokenKind::Ident(s) => return write!(f, "identifier '{}'", s),
            TokenKind::Directive(Directive::Include { path, .. }) => {
                return write!(f, "#include {}", path)
            }
            TokenKind::Directive(Directive::Pragma(p)) => return write!(f, "#pragma {}", p),
            TokenKind::Void => "'void'",
            TokenKind::Bool => "'bool'",
            TokenKind::Char => "'char'",
            TokenKind::Short => "'short'",
            TokenKind::Int => "'int'",
            TokenKind::Long => "'long'",
            TokenKind::Float => "'float'",
            TokenKind::Double => "'double'",
            TokenKind::Signed => "'signed'",
            TokenKind::Unsigned => "'unsigned'",
            TokenKind::Auto => "'auto'",
            TokenKind::Const => "'const'",
            TokenKind::Volatile => "'volatile'",
            TokenKind::Static => "'static'",
            TokenKind::Extern => "'extern'",
            TokenKind::Inline => "'inline'",
            TokenKind::Register => "'register'",
            TokenKind::Struct => "'struct'",
            TokenKind::Class => "'class'",
            TokenKind::Union => "'union'",
            TokenKind::Enum => "'enum'",
            TokenKind::Typedef => "'typedef'",
            TokenKind::Public => "'public'",
            TokenKind::Private => "'private'",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::Do => "'do'",
            TokenKind::For => "'for'",
            TokenKind::Break => "'break'",
            TokenKind::Continue => "'continue'",
            TokenKind::Return => "'return'",
            TokenKind::Switch => "'switch'",
            TokenKind::Case => "'case'",
            TokenKind::Default => "'default'",
            TokenKind::Goto => "'goto'",
            TokenKind::Sizeof => "'sizeof'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::Nullptr => "'nullptr'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Semi => "';'",
            TokenKind::Comma => "','",
            TokenKind::Dot => "'.'",
            TokenKind::Arrow => "'->'",
            TokenKind::Question => "'?'",
            TokenKind::Colon => "':'",
            TokenKind::Ellipsis => "'...'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Amp => "'&'",
            TokenKind::Pipe => "'|'",
            TokenKind::Caret => "'^'",
            TokenKind::Tilde => "'~'",
            TokenKind::Bang => "'!'",
            TokenKind::Assign => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Gt => "'>'",
            TokenKind::LtEq => "'<='",
            TokenKind::GtEq => "'>='",
            TokenKind::AndAnd => "'&&'",
            TokenKind::OrOr => "'||'",
            TokenKind::Shl => "'<<'",
            TokenKind::Shr => "'>>'",
            TokenKind::PlusPlus => "'++'",
            TokenKind::MinusMinus => "'--'",
            TokenKind::PlusAssign => "'+='",
            TokenKind::MinusAssign => "'-='",
            TokenKind::StarAssign => "'*='",
            TokenKind::SlashAssign => "'/='",
            TokenKind::PercentAssign => "'%='",
            TokenKind::AmpAssign => "'&='",
            TokenKind::PipeAssign => "'|='",
            TokenKind::CaretAssign => "'^='",
            TokenKind::ShlAssign => "'<<='",
            TokenKind::ShrAssign => "'>>='",
            TokenKind::Eof => "end of input",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}
