//! Recursive descent parser with precedence climbing for the C subset.
//!
//! The parser yields one top-level declaration group at a time so that the
//! fragment parser can analyse (and possibly reject) each group before the
//! next one is read. Whether an identifier names a type is decided against a
//! set seeded from the analyzer and extended with every typedef and tag the
//! parser sees.

use std::collections::HashSet;

use crate::compiler::ast::*;
use crate::compiler::tokens::{Directive, Span, Token, TokenKind};
use crate::compiler::types::{CType, IntRank};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String, span: Span },
    #[error("function definition is not allowed here")]
    NestedFunction { name: String, span: Span },
    #[error("{what} is not supported")]
    Unsupported { what: String, span: Span },
    #[error("{message}")]
    Invalid { message: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Unexpected { span, .. }
            | ParseError::NestedFunction { span, .. }
            | ParseError::Unsupported { span, .. }
            | ParseError::Invalid { span, .. } => *span,
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: NodeId,
    type_names: HashSet<String>,
    extern_c_depth: usize,
    current_function: Option<String>,
    anon_counter: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, type_names: HashSet<String>) -> Self {
        Self {
            tokens,
            pos: 0,
            next_id: 0,
            type_names,
            extern_c_depth: 0,
            current_function: None,
            anon_counter: 0,
        }
    }

    /// Continue statement numbering from a previous parse.
    pub fn with_first_id(mut self, first: NodeId) -> Self {
        self.next_id = first;
        self
    }

    pub fn next_id(&self) -> NodeId {
        self.next_id
    }

    /// Name of the function whose body was being parsed when an error hit.
    pub fn current_function(&self) -> Option<&str> {
        self.current_function.as_deref()
    }

    pub fn add_type_name(&mut self, name: &str) {
        self.type_names.insert(name.to_string());
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn current(&self) -> &Token {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn peek_kind(&self) -> &TokenKind { &self.current().kind }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let idx = (self.pos + n).min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) { self.advance(); true } else { false }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("{}", kind)))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.current();
        ParseError::Unexpected {
            expected: expected.to_string(),
            found: format!("{}", tok.kind),
            span: tok.span,
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn prev_span(&self) -> Span {
        self.tokens.get(self.pos.wrapping_sub(1)).map(|t| t.span).unwrap_or_else(Span::dummy)
    }

    pub fn at_end(&self) -> bool { matches!(self.peek_kind(), TokenKind::Eof) }

    fn is_type_name(&self, name: &str) -> bool {
        self.type_names.contains(name)
    }

    /// True if the token at `n` can begin a type.
    fn starts_type_at(&self, n: usize) -> bool {
        match self.peek_nth(n) {
            TokenKind::Ident(name) => self.is_type_name(name),
            kind => kind.starts_type(),
        }
    }

    fn starts_declaration(&self) -> bool {
        match self.peek_kind() {
            // `T(x)` and `T::x` are not handled as declarations.
            TokenKind::Ident(name) => {
                self.is_type_name(name)
                    && !matches!(
                        self.peek_nth(1),
                        TokenKind::Dot | TokenKind::Arrow | TokenKind::Assign
                    )
            }
            kind => kind.starts_type(),
        }
    }

    // ── Top level ──

    /// Parses the next top-level declaration group, or `None` at end of input.
    pub fn parse_top_level(&mut self) -> Result<Option<DeclGroup>, ParseError> {
        loop {
            match self.peek_kind().clone() {
                TokenKind::Eof => {
                    if self.extern_c_depth > 0 {
                        return Err(self.unexpected("'}'"));
                    }
                    return Ok(None);
                }
                TokenKind::Semi => {
                    self.advance();
                }
                TokenKind::Directive(Directive::Pragma(_)) => {
                    self.advance();
                }
                TokenKind::Directive(Directive::Include { .. }) => {
                    let span = self.current().span;
                    return Err(ParseError::Invalid {
                        message:
                            "#include is only allowed at the start of a line outside of functions"
                                .into(),
                        span,
                    });
                }
                TokenKind::RBrace if self.extern_c_depth > 0 => {
                    self.advance();
                    self.extern_c_depth -= 1;
                }
                TokenKind::Extern
                    if matches!(self.peek_nth(1), TokenKind::StringLit(s) if s == "C")
                        && matches!(self.peek_nth(2), TokenKind::LBrace) =>
                {
                    self.advance();
                    self.advance();
                    self.advance();
                    self.extern_c_depth += 1;
                }
                _ => {
                    let mut group = self.parse_decl_group(true)?;
                    if self.extern_c_depth > 0 {
                        group.spec.extern_c = true;
                        for decl in &mut group.decls {
                            if let DeclKind::Function(f) = &mut decl.kind {
                                f.extern_c = true;
                            }
                        }
                    }
                    return Ok(Some(group));
                }
            }
        }
    }

    // ── Declarations ──

    fn parse_decl_group(&mut self, top_level: bool) -> Result<DeclGroup, ParseError> {
        let start = self.current().span;
        let (spec, definition) = self.parse_decl_spec()?;
        let mut decls = Vec::new();
        if let Some(def) = definition {
            decls.push(def);
        }
        if self.eat(&TokenKind::Semi) {
            if decls.is_empty() {
                return Err(ParseError::Invalid {
                    message: "declaration does not declare anything".into(),
                    span: start,
                });
            }
            return Ok(DeclGroup { spec, decls, span: start.merge(self.prev_span()) });
        }

        let mut first = true;
        loop {
            let declarator = self.parse_declarator(false)?;
            let Some(name) = declarator.name.clone() else {
                return Err(self.unexpected("identifier"));
            };
            let decl_start = if first { start } else { declarator.span };

            if declarator.is_function() && self.check(&TokenKind::LBrace) {
                if !top_level {
                    return Err(ParseError::NestedFunction { name, span: declarator.span });
                }
                if !first || spec.storage == Storage::Typedef {
                    return Err(self.unexpected("';'"));
                }
                self.current_function = Some(name.clone());
                let body = self.parse_compound()?;
                self.current_function = None;
                let span = decl_start.merge(body.span);
                decls.push(Decl {
                    kind: DeclKind::Function(FunctionDecl {
                        name,
                        declarator,
                        body: Some(body),
                        extern_c: spec.extern_c,
                        ret: CType::Void,
                        params: Vec::new(),
                        variadic: false,
                        frame_slots: 0,
                    }),
                    span,
                });
                return Ok(DeclGroup { spec, decls, span: start.merge(span) });
            }

            let kind = if spec.storage == Storage::Typedef {
                self.add_type_name(&name);
                DeclKind::Typedef(TypedefDecl { name, declarator, ty: CType::Void })
            } else if declarator.is_function() {
                DeclKind::Function(FunctionDecl {
                    name,
                    declarator,
                    body: None,
                    extern_c: spec.extern_c,
                    ret: CType::Void,
                    params: Vec::new(),
                    variadic: false,
                    frame_slots: 0,
                })
            } else {
                let init = self.parse_var_init()?;
                DeclKind::Var(VarDecl {
                    name,
                    declarator,
                    init,
                    ty: CType::Void,
                    storage: VarStorage::Global,
                    link_name: String::new(),
                    is_extern: false,
                    constant_init: None,
                })
            };
            let end = self.prev_span();
            decls.push(Decl { kind, span: decl_start.merge(end) });
            first = false;

            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::Semi)?;
            return Ok(DeclGroup { spec, decls, span: start.merge(self.prev_span()) });
        }
    }

    fn parse_var_init(&mut self) -> Result<Option<Initializer>, ParseError> {
        if self.eat(&TokenKind::Assign) {
            return Ok(Some(self.parse_initializer()?));
        }
        if self.check(&TokenKind::LParen) {
            let open = self.advance().span;
            let mut args = Vec::new();
            if !self.check(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_assign()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            let close = self.expect(&TokenKind::RParen)?.span;
            return Ok(Some(Initializer::Construct(args, open.merge(close))));
        }
        Ok(None)
    }

    fn parse_initializer(&mut self) -> Result<Initializer, ParseError> {
        if self.check(&TokenKind::LBrace) {
            let open = self.advance().span;
            let mut items = Vec::new();
            while !self.check(&TokenKind::RBrace) {
                items.push(self.parse_initializer()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            let close = self.expect(&TokenKind::RBrace)?.span;
            return Ok(Initializer::List(items, open.merge(close)));
        }
        Ok(Initializer::Expr(self.parse_assign()?))
    }

    /// Parses specifiers. A `struct`/`enum` body becomes its own declaration,
    /// returned alongside a spec that refers to it by name.
    fn parse_decl_spec(&mut self) -> Result<(DeclSpec, Option<Decl>), ParseError> {
        let start = self.current().span;
        let mut storage = Storage::None;
        let mut is_const = false;
        let mut is_inline = false;
        let mut extern_c = false;
        let mut words: Vec<TokenKind> = Vec::new();
        let mut base: Option<BaseType> = None;
        let mut definition = None;

        loop {
            let kind = self.peek_kind().clone();
            match kind {
                TokenKind::Typedef => {
                    self.advance();
                    storage = Storage::Typedef;
                }
                TokenKind::Static => {
                    self.advance();
                    storage = Storage::Static;
                }
                TokenKind::Extern => {
                    self.advance();
                    if matches!(self.peek_kind(), TokenKind::StringLit(s) if s == "C") {
                        self.advance();
                        extern_c = true;
                    } else {
                        storage = Storage::Extern;
                    }
                }
                TokenKind::Inline => {
                    self.advance();
                    is_inline = true;
                }
                TokenKind::Register | TokenKind::Volatile => {
                    self.advance();
                }
                TokenKind::Const => {
                    self.advance();
                    is_const = true;
                }
                TokenKind::Void | TokenKind::Bool | TokenKind::Char | TokenKind::Short
                | TokenKind::Int | TokenKind::Long | TokenKind::Float | TokenKind::Double
                | TokenKind::Signed | TokenKind::Unsigned | TokenKind::Auto => {
                    if base.is_some() {
                        return Err(self.unexpected("declarator"));
                    }
                    words.push(self.advance().kind);
                }
                TokenKind::Struct | TokenKind::Class | TokenKind::Union | TokenKind::Enum => {
                    if base.is_some() || !words.is_empty() {
                        return Err(self.unexpected("declarator"));
                    }
                    let (b, def) = self.parse_tagged_type(storage == Storage::Typedef)?;
                    base = Some(b);
                    definition = def;
                }
                TokenKind::Ident(ref name)
                    if base.is_none() && words.is_empty() && self.is_type_name(name) =>
                {
                    self.advance();
                    base = Some(BaseType::Named(name.clone()));
                }
                _ => break,
            }
        }

        let base = match base {
            Some(b) => b,
            None if words.is_empty() => return Err(self.unexpected("type specifier")),
            None => self.builtin_base(&words, start)?,
        };
        let span = start.merge(self.prev_span());
        Ok((DeclSpec { base, storage, is_const, is_inline, extern_c, span }, definition))
    }

    fn builtin_base(&self, words: &[TokenKind], span: Span) -> Result<BaseType, ParseError> {
        let count = |k: TokenKind| words.iter().filter(|w| **w == k).count();
        let longs = count(TokenKind::Long);
        let signed = count(TokenKind::Signed) > 0;
        let unsigned = count(TokenKind::Unsigned) > 0;
        let invalid = || ParseError::Invalid {
            message: "invalid combination of type specifiers".into(),
            span,
        };
        if signed && unsigned {
            return Err(invalid());
        }
        let others: Vec<&TokenKind> = words
            .iter()
            .filter(|w| {
                !matches!(
                    w,
                    TokenKind::Long | TokenKind::Signed | TokenKind::Unsigned | TokenKind::Int
                )
            })
            .collect();
        if others.len() > 1 {
            return Err(invalid());
        }
        let has_int = count(TokenKind::Int) > 0;
        Ok(match others.first() {
            Some(TokenKind::Void) if words.len() == 1 => BaseType::Void,
            Some(TokenKind::Bool) if words.len() == 1 => BaseType::Bool,
            Some(TokenKind::Float) if words.len() == 1 => BaseType::Float,
            Some(TokenKind::Double) if longs <= 1 && !signed && !unsigned && !has_int => {
                BaseType::Double
            }
            Some(TokenKind::Auto) if words.len() == 1 => BaseType::Auto,
            Some(TokenKind::Char) if longs == 0 && !has_int => {
                BaseType::Int { rank: IntRank::Char, signed: !unsigned }
            }
            Some(TokenKind::Short) if longs == 0 => {
                BaseType::Int { rank: IntRank::Short, signed: !unsigned }
            }
            Some(_) => return Err(invalid()),
            None => {
                let rank = match longs {
                    0 => IntRank::Int,
                    1 => IntRank::Long,
                    2 => IntRank::LongLong,
                    _ => return Err(invalid()),
                };
                BaseType::Int { rank, signed: !unsigned }
            }
        })
    }

    fn parse_tagged_type(
        &mut self,
        in_typedef: bool,
    ) -> Result<(BaseType, Option<Decl>), ParseError> {
        let kw = self.advance();
        let record_kind = match kw.kind {
            TokenKind::Struct => Some(RecordKind::Struct),
            TokenKind::Class => Some(RecordKind::Class),
            TokenKind::Union => {
                return Err(ParseError::Unsupported { what: "'union'".into(), span: kw.span })
            }
            _ => None,
        };
        let name = match self.peek_kind().clone() {
            TokenKind::Ident(n) => {
                self.advance();
                Some(n)
            }
            _ => None,
        };
        let has_body = self.check(&TokenKind::LBrace);
        let name = match (name, has_body) {
            (Some(n), _) => n,
            (None, true) if in_typedef => self.typedef_name_after_body(),
            (None, true) if record_kind.is_none() => {
                self.anon_counter += 1;
                format!("__cinder_anon_enum_{}", self.anon_counter)
            }
            (None, _) => {
                return Err(ParseError::Unsupported {
                    what: "anonymous struct outside of a typedef".into(),
                    span: kw.span,
                })
            }
        };

        match record_kind {
            Some(kind) => {
                self.add_type_name(&name);
                let base = BaseType::Record { kind, name: name.clone() };
                if !has_body {
                    // `struct P;` alone is a forward declaration; `struct P x;` only refers.
                    if self.check(&TokenKind::Semi) {
                        let record = RecordDecl { kind, name, fields: None, id: None };
                        let decl = Decl {
                            kind: DeclKind::Record(record),
                            span: kw.span.merge(self.prev_span()),
                        };
                        return Ok((base, Some(decl)));
                    }
                    return Ok((base, None));
                }
                let fields = self.parse_record_body()?;
                let record = RecordDecl { kind, name, fields: Some(fields), id: None };
                let decl = Decl {
                    kind: DeclKind::Record(record),
                    span: kw.span.merge(self.prev_span()),
                };
                Ok((base, Some(decl)))
            }
            None => {
                let anonymous = name.starts_with("__cinder_anon_enum_");
                if !anonymous {
                    self.add_type_name(&name);
                }
                let base = if anonymous {
                    BaseType::Int { rank: IntRank::Int, signed: true }
                } else {
                    BaseType::Enum(name.clone())
                };
                if !has_body {
                    return Ok((base, None));
                }
                self.advance(); // '{'
                let mut variants = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let (vname, vspan) = self.expect_ident()?;
                    let value = if self.eat(&TokenKind::Assign) {
                        Some(self.parse_conditional()?)
                    } else {
                        None
                    };
                    let span = vspan.merge(self.prev_span());
                    variants.push(Enumerator { name: vname, value, resolved: 0, span });
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                let name = if anonymous { None } else { Some(name) };
                let decl = Decl {
                    kind: DeclKind::Enum(EnumDecl { name, variants }),
                    span: kw.span.merge(self.prev_span()),
                };
                Ok((base, Some(decl)))
            }
        }
    }

    /// For `typedef struct { ... } Name;` the record takes the typedef name.
    fn typedef_name_after_body(&mut self) -> String {
        let mut depth = 0usize;
        let mut idx = self.pos;
        while idx < self.tokens.len() {
            match &self.tokens[idx].kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let next = self.tokens.get(idx + 1).map(|t| &t.kind);
                        if let Some(TokenKind::Ident(name)) = next {
                            return name.clone();
                        }
                        break;
                    }
                }
                TokenKind::Eof => break,
                _ => {}
            }
            idx += 1;
        }
        self.anon_counter += 1;
        format!("__cinder_anon_{}", self.anon_counter)
    }

    fn parse_record_body(&mut self) -> Result<Vec<FieldDecl>, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if matches!(self.peek_kind(), TokenKind::Public | TokenKind::Private) {
                self.advance();
                self.expect(&TokenKind::Colon)?;
                continue;
            }
            if self.at_end() {
                return Err(self.unexpected("'}'"));
            }
            let start = self.current().span;
            let (spec, nested) = self.parse_decl_spec()?;
            if nested.is_some() {
                return Err(ParseError::Unsupported {
                    what: "nested type definitions".into(),
                    span: start,
                });
            }
            let mut declarators = Vec::new();
            loop {
                let d = self.parse_declarator(false)?;
                if d.is_function() {
                    return Err(ParseError::Unsupported {
                        what: "member functions".into(),
                        span: d.span,
                    });
                }
                if d.name.is_none() {
                    return Err(self.unexpected("field name"));
                }
                declarators.push(d);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Semi)?;
            fields.push(FieldDecl { spec, declarators, span: start.merge(self.prev_span()) });
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(fields)
    }

    /// Parses pointers, name and suffixes. `abstract_ok` allows a missing name.
    fn parse_declarator(&mut self, abstract_ok: bool) -> Result<Declarator, ParseError> {
        let start = self.current().span;
        let mut pointers = 0;
        while self.check(&TokenKind::Star) {
            self.advance();
            pointers += 1;
            while matches!(self.peek_kind(), TokenKind::Const | TokenKind::Volatile) {
                self.advance();
            }
        }
        if self.check(&TokenKind::LParen) && matches!(self.peek_nth(1), TokenKind::Star) {
            return Err(ParseError::Unsupported {
                what: "function pointers".into(),
                span: self.current().span,
            });
        }
        let name = match self.peek_kind().clone() {
            TokenKind::Ident(n) => {
                self.advance();
                Some(n)
            }
            _ if abstract_ok => None,
            _ => return Err(self.unexpected("identifier")),
        };
        let mut suffixes = Vec::new();
        loop {
            if self.check(&TokenKind::LBracket) {
                self.advance();
                let size = if self.check(&TokenKind::RBracket) {
                    None
                } else {
                    Some(self.parse_conditional()?)
                };
                self.expect(&TokenKind::RBracket)?;
                suffixes.push(Suffix::Array(size));
            } else if self.check(&TokenKind::LParen)
                && suffixes.is_empty()
                && self.looks_like_params()
            {
                suffixes.push(self.parse_params()?);
            } else {
                break;
            }
        }
        let span = start.merge(self.prev_span());
        Ok(Declarator { name, pointers, suffixes, span })
    }

    /// `(` followed by `)`, `...`, `void)` or a type starts a parameter list;
    /// anything else is a constructor-style initializer.
    fn looks_like_params(&self) -> bool {
        matches!(self.peek_nth(1), TokenKind::RParen | TokenKind::Ellipsis)
            || self.starts_type_at(1)
    }

    fn parse_params(&mut self) -> Result<Suffix, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut variadic = false;
        if matches!(self.peek_kind(), TokenKind::Void)
            && matches!(self.peek_nth(1), TokenKind::RParen)
        {
            self.advance();
        } else if !self.check(&TokenKind::RParen) {
            loop {
                if self.eat(&TokenKind::Ellipsis) {
                    variadic = true;
                    break;
                }
                let start = self.current().span;
                let (spec, def) = self.parse_decl_spec()?;
                if def.is_some() {
                    return Err(ParseError::Unsupported {
                        what: "type definitions in parameters".into(),
                        span: start,
                    });
                }
                let declarator = self.parse_declarator(true)?;
                params.push(ParamDecl { spec, declarator, span: start.merge(self.prev_span()) });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(Suffix::Function { params, variadic })
    }

    fn parse_type_name(&mut self) -> Result<TypeName, ParseError> {
        let start = self.current().span;
        let (spec, def) = self.parse_decl_spec()?;
        if def.is_some() {
            return Err(ParseError::Unsupported {
                what: "type definitions in casts".into(),
                span: start,
            });
        }
        let declarator = self.parse_declarator(true)?;
        if declarator.name.is_some() {
            return Err(ParseError::Invalid {
                message: "unexpected name in type".into(),
                span: declarator.span,
            });
        }
        Ok(TypeName { spec, declarator, resolved: CType::Void })
    }

    // ── Statements ──

    /// Parses a `{ ... }` block.
    pub fn parse_compound(&mut self) -> Result<Stmt, ParseError> {
        let open = self.expect(&TokenKind::LBrace)?.span;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_end() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        let close = self.expect(&TokenKind::RBrace)?.span;
        let id = self.fresh_id();
        Ok(Stmt { id, kind: StmtKind::Compound(stmts), span: open.merge(close) })
    }

    pub fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current().span;
        let kind = match self.peek_kind().clone() {
            TokenKind::LBrace => return self.parse_compound(),
            TokenKind::Semi => {
                self.advance();
                StmtKind::Null
            }
            TokenKind::Directive(Directive::Pragma(_)) => {
                self.advance();
                StmtKind::Null
            }
            TokenKind::If => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                let then = Box::new(self.parse_stmt()?);
                let els = if self.eat(&TokenKind::Else) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                StmtKind::If { cond, then, els }
            }
            TokenKind::While => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                StmtKind::While { cond, body }
            }
            TokenKind::Do => {
                self.advance();
                let body = Box::new(self.parse_stmt()?);
                self.expect(&TokenKind::While)?;
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                self.expect(&TokenKind::Semi)?;
                StmtKind::DoWhile { body, cond }
            }
            TokenKind::For => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let init = if self.check(&TokenKind::Semi) {
                    self.advance();
                    None
                } else if self.starts_declaration() {
                    let group = self.parse_decl_group(false)?;
                    let span = group.span;
                    Some(Box::new(Stmt { id: self.fresh_id(), kind: StmtKind::Decl(group), span }))
                } else {
                    let e = self.parse_expr()?;
                    self.expect(&TokenKind::Semi)?;
                    let span = e.span.merge(self.prev_span());
                    Some(Box::new(Stmt { id: self.fresh_id(), kind: StmtKind::Expr(e), span }))
                };
                let cond =
                    if self.check(&TokenKind::Semi) { None } else { Some(self.parse_expr()?) };
                self.expect(&TokenKind::Semi)?;
                let step =
                    if self.check(&TokenKind::RParen) { None } else { Some(self.parse_expr()?) };
                self.expect(&TokenKind::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                StmtKind::For { init, cond, step, body }
            }
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Semi)?;
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(&TokenKind::Semi)?;
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                let value =
                    if self.check(&TokenKind::Semi) { None } else { Some(self.parse_expr()?) };
                self.expect(&TokenKind::Semi)?;
                StmtKind::Return(value)
            }
            TokenKind::Switch | TokenKind::Case | TokenKind::Default | TokenKind::Goto => {
                let tok = self.advance();
                return Err(ParseError::Unsupported {
                    what: format!("{} statement", tok.kind),
                    span: tok.span,
                });
            }
            TokenKind::Directive(Directive::Include { .. }) => {
                return Err(ParseError::Invalid {
                    message: "#include is not allowed inside a function".into(),
                    span: start,
                });
            }
            _ if self.starts_declaration() => {
                let group = self.parse_decl_group(false)?;
                StmtKind::Decl(group)
            }
            _ => {
                let e = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                StmtKind::Expr(e)
            }
        };
        let span = start.merge(self.prev_span());
        Ok(Stmt { id: self.fresh_id(), kind, span })
    }

    // ── Expressions ──

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_assign()?;
        while self.eat(&TokenKind::Comma) {
            let rhs = self.parse_assign()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(ExprKind::Comma(Box::new(lhs), Box::new(rhs)), span);
        }
        Ok(lhs)
    }

    fn parse_assign(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_conditional()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            TokenKind::PercentAssign => Some(BinOp::Rem),
            TokenKind::AmpAssign => Some(BinOp::BitAnd),
            TokenKind::PipeAssign => Some(BinOp::BitOr),
            TokenKind::CaretAssign => Some(BinOp::BitXor),
            TokenKind::ShlAssign => Some(BinOp::Shl),
            TokenKind::ShrAssign => Some(BinOp::Shr),
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_assign()?;
        let span = lhs.span.merge(rhs.span);
        Ok(Expr::new(ExprKind::Assign(op, Box::new(lhs), Box::new(rhs)), span))
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_binary(0)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        let then = self.parse_expr()?;
        self.expect(&TokenKind::Colon)?;
        let els = self.parse_conditional()?;
        let span = cond.span.merge(els.span);
        Ok(Expr::new(ExprKind::Conditional(Box::new(cond), Box::new(then), Box::new(els)), span))
    }

    fn binary_op(&self) -> Option<BinOp> {
        Some(match self.peek_kind() {
            TokenKind::OrOr => BinOp::Or,
            TokenKind::AndAnd => BinOp::And,
            TokenKind::Pipe => BinOp::BitOr,
            TokenKind::Caret => BinOp::BitXor,
            TokenKind::Amp => BinOp::BitAnd,
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::NotEq => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::LtEq => BinOp::Le,
            TokenKind::GtEq => BinOp::Ge,
            TokenKind::Shl => BinOp::Shl,
            TokenKind::Shr => BinOp::Shr,
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Rem,
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.current().span;
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Star => Some(UnaryOp::Deref),
            TokenKind::Amp => Some(UnaryOp::AddrOf),
            TokenKind::PlusPlus => Some(UnaryOp::PreInc),
            TokenKind::MinusMinus => Some(UnaryOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            return Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), span));
        }
        if self.check(&TokenKind::Sizeof) {
            self.advance();
            if self.check(&TokenKind::LParen) && self.starts_type_at(1) {
                self.advance();
                let ty = self.parse_type_name()?;
                let close = self.expect(&TokenKind::RParen)?.span;
                return Ok(Expr::new(ExprKind::SizeofType(Box::new(ty)), start.merge(close)));
            }
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            return Ok(Expr::new(ExprKind::SizeofExpr(Box::new(operand)), span));
        }
        if self.check(&TokenKind::LParen) && self.starts_type_at(1) {
            self.advance();
            let ty = self.parse_type_name()?;
            self.expect(&TokenKind::RParen)?;
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            return Ok(Expr::new(ExprKind::Cast(Box::new(ty), Box::new(operand)), span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let close = self.expect(&TokenKind::RBracket)?.span;
                    let span = expr.span.merge(close);
                    expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), span);
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_assign()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let close = self.expect(&TokenKind::RParen)?.span;
                    let span = expr.span.merge(close);
                    expr = Expr::new(ExprKind::Call(Box::new(expr), args), span);
                }
                TokenKind::Dot | TokenKind::Arrow => {
                    let arrow = matches!(self.advance().kind, TokenKind::Arrow);
                    let (field, fspan) = self.expect_ident()?;
                    let span = expr.span.merge(fspan);
                    expr = Expr::new(ExprKind::Member { base: Box::new(expr), field, arrow }, span);
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let tok = self.advance();
                    let op = if tok.kind == TokenKind::PlusPlus {
                        UnaryOp::PostInc
                    } else {
                        UnaryOp::PostDec
                    };
                    let span = expr.span.merge(tok.span);
                    expr = Expr::new(ExprKind::Unary(op, Box::new(expr)), span);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.current().clone();
        let kind = match tok.kind {
            TokenKind::IntLit(v, suffix) => ExprKind::IntLit(v, suffix),
            TokenKind::FloatLit(v, single) => ExprKind::FloatLit(v, single),
            TokenKind::CharLit(c) => ExprKind::CharLit(c),
            TokenKind::StringLit(s) => ExprKind::StrLit(s),
            TokenKind::True => ExprKind::BoolLit(true),
            TokenKind::False => ExprKind::BoolLit(false),
            TokenKind::Nullptr => ExprKind::Null,
            TokenKind::Ident(name) => ExprKind::Ident(name, Binding::Unresolved),
            TokenKind::LParen => {
                self.advance();
                let mut inner = self.parse_expr()?;
                let close = self.expect(&TokenKind::RParen)?.span;
                inner.span = tok.span.merge(close);
                return Ok(inner);
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(Expr::new(kind, tok.span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;

    fn parser(src: &str) -> Parser {
        let tokens = Lexer::new(src, 0, 0).tokenize().unwrap();
        Parser::new(tokens, HashSet::new())
    }

    fn groups(src: &str) -> Vec<DeclGroup> {
        let mut p = parser(src);
        let mut out = Vec::new();
        while let Some(g) = p.parse_top_level().unwrap() {
            out.push(g);
        }
        out
    }

    fn stmt(src: &str) -> Stmt {
        parser(src).parse_stmt().unwrap()
    }

    #[test]
    fn parses_globals_and_functions() {
        let gs = groups("int a = 1, *b; int add(int x, int y) { return x + y; }");
        assert_eq!(gs.len(), 2);
        assert_eq!(gs[0].decls.len(), 2);
        assert_eq!(gs[0].decls[1].as_var().unwrap().declarator.pointers, 1);
        let f = gs[1].decls[0].as_function().unwrap();
        assert_eq!(f.name, "add");
        assert!(f.body.is_some());
    }

    #[test]
    fn struct_definition_is_its_own_decl() {
        let gs = groups("struct P { int x; int y; } origin = {0, 0};");
        assert_eq!(gs.len(), 1);
        assert!(matches!(gs[0].decls[0].kind, DeclKind::Record(_)));
        assert!(matches!(gs[0].decls[1].kind, DeclKind::Var(_)));
        // The tag is a type name from now on.
        let gs = groups("struct Q { int v; }; Q q;");
        assert_eq!(gs.len(), 2);
    }

    #[test]
    fn typedef_names_become_types() {
        let gs = groups(
            "typedef unsigned long size; size n = 3; typedef struct { int v; } Box; Box b;",
        );
        assert_eq!(gs.len(), 4);
        match &gs[2].decls[0].kind {
            DeclKind::Record(r) => assert_eq!(r.name, "Box"),
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn constructor_init_vs_prototype() {
        let gs = groups("int x(5); int f(int); int g();");
        assert!(matches!(gs[0].decls[0].as_var().unwrap().init, Some(Initializer::Construct(..))));
        assert!(gs[1].decls[0].as_function().is_some());
        assert!(gs[2].decls[0].as_function().is_some());
    }

    #[test]
    fn extern_c_block() {
        let gs = groups("extern \"C\" { void f(); } extern \"C\" int g() { return 1; }");
        assert!(gs.iter().all(|g| g.spec.extern_c));
    }

    #[test]
    fn nested_function_is_rejected() {
        let mut p = parser("{ int f() { return 1; } }");
        assert!(matches!(p.parse_stmt(), Err(ParseError::NestedFunction { .. })));
    }

    #[test]
    fn precedence_and_casts() {
        let s = stmt("x = (double)a + b * c;");
        let StmtKind::Expr(e) = s.kind else { panic!() };
        let ExprKind::Assign(None, _, rhs) = e.kind else { panic!() };
        let ExprKind::Binary(BinOp::Add, lhs, mul) = rhs.kind else { panic!() };
        assert!(matches!(lhs.kind, ExprKind::Cast(..)));
        assert!(matches!(mul.kind, ExprKind::Binary(BinOp::Mul, ..)));
    }

    #[test]
    fn parenthesized_span_includes_parens() {
        let s = stmt("(a + b) * 2;");
        let StmtKind::Expr(e) = s.kind else { panic!() };
        assert_eq!((e.span.start, e.span.end), (0, 11));
        assert_eq!((s.span.start, s.span.end), (0, 12));
    }

    #[test]
    fn for_loop_with_declaration() {
        let s = stmt("for (int i = 0; i < 3; ++i) sum += i;");
        let StmtKind::For { init, cond, step, .. } = s.kind else { panic!() };
        assert!(matches!(init.unwrap().kind, StmtKind::Decl(_)));
        assert!(cond.is_some() && step.is_some());
    }

    #[test]
    fn unsupported_constructs_are_reported() {
        let mut p = parser("switch (x) { }");
        assert!(matches!(p.parse_stmt(), Err(ParseError::Unsupported { .. })));
        let mut p = parser("union U { int a; };");
        assert!(matches!(p.parse_top_level(), Err(ParseError::Unsupported { .. })));
    }
}
