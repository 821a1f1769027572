//! Lexer for the C subset, including `#include` / `#pragma` directives.

use crate::compiler::tokens::{Directive, IntSuffix, Span, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{ch}'")]
    UnexpectedChar { ch: char, span: Span },
    #[error("missing terminating '\"' character")]
    UnterminatedString { span: Span },
    #[error("missing terminating ' character")]
    UnterminatedChar { span: Span },
    #[error("unterminated /* comment")]
    UnterminatedComment { span: Span },
    #[error("invalid numeric literal '{text}'")]
    InvalidNumber { text: String, span: Span },
    #[error("unknown escape sequence '\\{ch}'")]
    InvalidEscape { ch: char, span: Span },
    #[error("preprocessor directive '#{name}' is not supported")]
    UnsupportedDirective { name: String, span: Span },
    #[error("expected \"FILENAME\" or <FILENAME>")]
    MalformedInclude { span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::UnterminatedChar { span }
            | LexError::UnterminatedComment { span }
            | LexError::InvalidNumber { span, .. }
            | LexError::InvalidEscape { span, .. }
            | LexError::UnsupportedDirective { span, .. }
            | LexError::MalformedInclude { span } => *span,
        }
    }
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    byte_offset: usize,
    file: u32,
    base_offset: usize,
    at_line_start: bool,
}

impl Lexer {
    /// `base_offset` is where `source` starts inside buffer `file`.
    pub fn new(source: &str, file: u32, base_offset: usize) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            byte_offset: 0,
            file,
            base_offset,
            at_line_start: true,
        }
    }

    fn current(&self) -> Option<char> { self.source.get(self.pos).copied() }
    fn peek(&self) -> Option<char> { self.source.get(self.pos + 1).copied() }
    fn peek_at(&self, n: usize) -> Option<char> { self.source.get(self.pos + n).copied() }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        self.byte_offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
            self.at_line_start = true;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn span_from(&self, so: usize, sl: usize, sc: usize) -> Span {
        Span::new(self.file, self.base_offset + so, self.base_offset + self.byte_offset, sl, sc)
    }

    fn span_here(&self) -> Span {
        self.span_from(self.byte_offset, self.line, self.col)
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match (self.current(), self.peek()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.advance();
                }
                (Some('\\'), Some('\n')) => {
                    self.advance();
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while !matches!(self.current(), None | Some('\n')) {
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.span_here();
                    self.advance();
                    self.advance();
                    loop {
                        match (self.current(), self.peek()) {
                            (None, _) => return Err(LexError::UnterminatedComment { span: start }),
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            self.skip_trivia()?;
            let Some(ch) = self.current() else { break };
            let line_start = self.at_line_start;
            self.at_line_start = false;
            let (so, sl, sc) = (self.byte_offset, self.line, self.col);
            if ch == '#' && line_start {
                tokens.push(self.read_directive()?);
                continue;
            }
            let digit_follows = self.peek().is_some_and(|c| c.is_ascii_digit());
            let starts_number = ch.is_ascii_digit() || (ch == '.' && digit_follows);
            let tok = if starts_number {
                self.read_number()?
            } else if ch.is_alphabetic() || ch == '_' {
                self.read_ident()
            } else if ch == '"' {
                self.read_string()?
            } else if ch == '\'' {
                self.read_char()?
            } else {
                let kind = self.read_punct(ch)?;
                Token::new(kind, self.span_from(so, sl, sc))
            };
            // Adjacent string literals concatenate.
            if let (
                TokenKind::StringLit(next),
                Some(Token { kind: TokenKind::StringLit(prev), span }),
            ) = (&tok.kind, tokens.last_mut())
            {
                prev.push_str(next);
                *span = span.merge(tok.span);
                continue;
            }
            tokens.push(tok);
        }
        tokens.push(Token::new(TokenKind::Eof, self.span_here()));
        Ok(tokens)
    }

    fn read_directive(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance(); // '#'
        while matches!(self.current(), Some(' ') | Some('\t')) {
            self.advance();
        }
        let mut name = String::new();
        while let Some(c) = self.current().filter(|c| c.is_alphanumeric() || *c == '_') {
            name.push(c);
            self.advance();
        }
        let mut rest = String::new();
        while let Some(c) = self.current().filter(|c| *c != '\n') {
            rest.push(c);
            self.advance();
        }
        let span = self.span_from(so, sl, sc);
        let rest = strip_line_comment(&rest);
        match name.as_str() {
            "include" => {
                let rest = rest.trim();
                let quoted = rest.strip_prefix('"').and_then(|r| r.strip_suffix('"'));
                let bracketed = rest.strip_prefix('<').and_then(|r| r.strip_suffix('>'));
                let (path, angled) = if let Some(inner) = quoted {
                    (inner, false)
                } else if let Some(inner) = bracketed {
                    (inner, true)
                } else {
                    return Err(LexError::MalformedInclude { span });
                };
                if path.is_empty() {
                    return Err(LexError::MalformedInclude { span });
                }
                let include = Directive::Include { path: path.to_string(), angled };
                Ok(Token::new(TokenKind::Directive(include), span))
            }
            "pragma" => {
                let pragma = Directive::Pragma(rest.trim().to_string());
                Ok(Token::new(TokenKind::Directive(pragma), span))
            }
            _ => Err(LexError::UnsupportedDirective { name, span }),
        }
    }

    fn read_ident(&mut self) -> Token {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let mut word = String::new();
        while let Some(c) = self.current().filter(|c| c.is_alphanumeric() || *c == '_') {
            word.push(c);
            self.advance();
        }
        let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Ident(word));
        Token::new(kind, self.span_from(so, sl, sc))
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let mut text = String::new();
        let hex = self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X'));
        if hex {
            self.advance();
            self.advance();
            while let Some(c) = self.current().filter(|c| c.is_ascii_hexdigit() || *c == '\'') {
                if c != '\'' {
                    text.push(c);
                }
                self.advance();
            }
        } else {
            while let Some(c) = self.current() {
                let exp_sign = matches!(c, '+' | '-') && text.ends_with(['e', 'E']);
                if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exp_sign {
                    text.push(c);
                    self.advance();
                } else if c == '\'' {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let mut suffix = String::new();
        while let Some(c) = self.current().filter(|c| c.is_ascii_alphabetic()) {
            suffix.push(c.to_ascii_lowercase());
            self.advance();
        }
        let span = self.span_from(so, sl, sc);
        let invalid = || LexError::InvalidNumber { text: format!("{}{}", text, suffix), span };
        let is_float = !hex && (text.contains('.') || text.contains(['e', 'E']));
        if is_float {
            let value: f64 = text.parse().map_err(|_| invalid())?;
            let single = match suffix.as_str() {
                "" | "l" => false,
                "f" => true,
                _ => return Err(invalid()),
            };
            return Ok(Token::new(TokenKind::FloatLit(value, single), span));
        }
        let value = if hex {
            u64::from_str_radix(&text, 16).map_err(|_| invalid())?
        } else if text.len() > 1 && text.starts_with('0') {
            u64::from_str_radix(&text[1..], 8).map_err(|_| invalid())?
        } else {
            text.parse::<u64>().map_err(|_| invalid())?
        };
        let suffix = match suffix.as_str() {
            "" => IntSuffix::None,
            "u" => IntSuffix::U,
            "l" => IntSuffix::L,
            "ul" | "lu" => IntSuffix::UL,
            "ll" => IntSuffix::LL,
            "ull" | "llu" => IntSuffix::ULL,
            _ => return Err(invalid()),
        };
        Ok(Token::new(TokenKind::IntLit(value, suffix), span))
    }

    fn read_escape(&mut self) -> Result<char, LexError> {
        let span = self.span_here();
        let Some(c) = self.advance() else {
            return Err(LexError::UnterminatedString { span });
        };
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0'..='7' => {
                let mut value = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.current().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            self.advance();
                        }
                        None => break,
                    }
                }
                char::from_u32(value).unwrap_or('\0')
            }
            'x' => {
                let mut value = 0u32;
                while let Some(d) = self.current().and_then(|d| d.to_digit(16)) {
                    value = value.wrapping_mul(16).wrapping_add(d);
                    self.advance();
                }
                char::from_u32(value & 0xff).unwrap_or('\0')
            }
            'a' => '\u{7}',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '\\' | '\'' | '"' | '?' => c,
            other => return Err(LexError::InvalidEscape { ch: other, span }),
        })
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.current() {
                None | Some('\n') => {
                    return Err(LexError::UnterminatedString { span: self.span_from(so, sl, sc) })
                }
                Some('\\') => {
                    self.advance();
                    s.push(self.read_escape()?);
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::new(TokenKind::StringLit(s), self.span_from(so, sl, sc)))
    }

    fn read_char(&mut self) -> Result<Token, LexError> {
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        self.advance();
        let value = match self.current() {
            None | Some('\n') | Some('\'') => {
                return Err(LexError::UnterminatedChar { span: self.span_from(so, sl, sc) })
            }
            Some('\\') => { self.advance(); self.read_escape()? }
            Some(c) => { self.advance(); c }
        };
        if self.current() != Some('\'') {
            return Err(LexError::UnterminatedChar { span: self.span_from(so, sl, sc) });
        }
        self.advance();
        Ok(Token::new(TokenKind::CharLit(value as i64), self.span_from(so, sl, sc)))
    }

    fn read_punct(&mut self, ch: char) -> Result<TokenKind, LexError> {
        let next = self.peek();
        let third = self.peek_at(2);
        let (kind, len) = match (ch, next, third) {
            ('<', Some('<'), Some('=')) => (TokenKind::ShlAssign, 3),
            ('>', Some('>'), Some('=')) => (TokenKind::ShrAssign, 3),
            ('.', Some('.'), Some('.')) => (TokenKind::Ellipsis, 3),
            ('-', Some('>'), _) => (TokenKind::Arrow, 2),
            ('+', Some('+'), _) => (TokenKind::PlusPlus, 2),
            ('-', Some('-'), _) => (TokenKind::MinusMinus, 2),
            ('+', Some('='), _) => (TokenKind::PlusAssign, 2),
            ('-', Some('='), _) => (TokenKind::MinusAssign, 2),
            ('*', Some('='), _) => (TokenKind::StarAssign, 2),
            ('/', Some('='), _) => (TokenKind::SlashAssign, 2),
            ('%', Some('='), _) => (TokenKind::PercentAssign, 2),
            ('&', Some('='), _) => (TokenKind::AmpAssign, 2),
            ('|', Some('='), _) => (TokenKind::PipeAssign, 2),
            ('^', Some('='), _) => (TokenKind::CaretAssign, 2),
            ('=', Some('='), _) => (TokenKind::EqEq, 2),
            ('!', Some('='), _) => (TokenKind::NotEq, 2),
            ('<', Some('='), _) => (TokenKind::LtEq, 2),
            ('>', Some('='), _) => (TokenKind::GtEq, 2),
            ('&', Some('&'), _) => (TokenKind::AndAnd, 2),
            ('|', Some('|'), _) => (TokenKind::OrOr, 2),
            ('<', Some('<'), _) => (TokenKind::Shl, 2),
            ('>', Some('>'), _) => (TokenKind::Shr, 2),
            ('(', ..) => (TokenKind::LParen, 1),
            (')', ..) => (TokenKind::RParen, 1),
            ('{', ..) => (TokenKind::LBrace, 1),
            ('}', ..) => (TokenKind::RBrace, 1),
            ('[', ..) => (TokenKind::LBracket, 1),
            (']', ..) => (TokenKind::RBracket, 1),
            (';', ..) => (TokenKind::Semi, 1),
            (',', ..) => (TokenKind::Comma, 1),
            ('.', ..) => (TokenKind::Dot, 1),
            ('?', ..) => (TokenKind::Question, 1),
            (':', ..) => (TokenKind::Colon, 1),
            ('+', ..) => (TokenKind::Plus, 1),
            ('-', ..) => (TokenKind::Minus, 1),
            ('*', ..) => (TokenKind::Star, 1),
            ('/', ..) => (TokenKind::Slash, 1),
            ('%', ..) => (TokenKind::Percent, 1),
            ('&', ..) => (TokenKind::Amp, 1),
            ('|', ..) => (TokenKind::Pipe, 1),
            ('^', ..) => (TokenKind::Caret, 1),
            ('~', ..) => (TokenKind::Tilde, 1),
            ('!', ..) => (TokenKind::Bang, 1),
            ('=', ..) => (TokenKind::Assign, 1),
            ('<', ..) => (TokenKind::Lt, 1),
            ('>', ..) => (TokenKind::Gt, 1),
            _ => return Err(LexError::UnexpectedChar { ch, span: self.span_here() }),
        };
        for _ in 0..len {
            self.advance();
        }
        Ok(kind)
    }
}

fn strip_line_comment(text: &str) -> &str {
    match text.find("//") {
        Some(idx) if text[..idx].matches('"').count() % 2 == 0 => &text[..idx],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, 0, 0).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_declaration() {
        assert_eq!(
            kinds("int x = 0x1F;"),
            vec![
                TokenKind::Int,
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::IntLit(31, IntSuffix::None),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn literal_suffixes_and_floats() {
        assert_eq!(kinds("10ul")[0], TokenKind::IntLit(10, IntSuffix::UL));
        assert_eq!(kinds("017")[0], TokenKind::IntLit(15, IntSuffix::None));
        assert_eq!(kinds("2.5f")[0], TokenKind::FloatLit(2.5, true));
        assert_eq!(kinds("1e3")[0], TokenKind::FloatLit(1000.0, false));
        assert_eq!(kinds(".5")[0], TokenKind::FloatLit(0.5, false));
    }

    #[test]
    fn strings_concatenate_and_escape() {
        assert_eq!(kinds("\"a\\n\" \"b\"")[0], TokenKind::StringLit("a\nb".into()));
        assert_eq!(kinds("'\\0'")[0], TokenKind::CharLit(0));
        assert_eq!(kinds("'A'")[0], TokenKind::CharLit(65));
    }

    #[test]
    fn directives_only_at_line_start() {
        let toks = kinds("#include \"calc.h\"\nint a;");
        assert_eq!(
            toks[0],
            TokenKind::Directive(Directive::Include { path: "calc.h".into(), angled: false })
        );
        assert!(matches!(
            Lexer::new("#define X 1", 0, 0).tokenize(),
            Err(LexError::UnsupportedDirective { .. })
        ));
        let toks = kinds("#include <stdio.h> // io");
        assert_eq!(
            toks[0],
            TokenKind::Directive(Directive::Include { path: "stdio.h".into(), angled: true })
        );
    }

    #[test]
    fn spans_are_buffer_relative() {
        let toks = Lexer::new("a\n  bb", 3, 100).tokenize().unwrap();
        assert_eq!(toks[1].span, Span::new(3, 104, 106, 2, 3));
    }

    #[test]
    fn reports_unterminated_comment() {
        assert!(matches!(
            Lexer::new("int /* open", 0, 0).tokenize(),
            Err(LexError::UnterminatedComment { .. })
        ));
    }
}
