//! Compiler diagnostics: position, source line with underline, and
//! did-you-mean hints, rendered with or without ANSI colors.

use std::fmt::Write;

use crate::compiler::lexer::LexError;
use crate::compiler::parser::ParseError;
use crate::compiler::source::SourceManager;
use crate::compiler::tokens::Span;
use crate::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// One message about the input, with whatever location is known.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub col: Option<usize>,
    pub source_line: Option<String>,
    pub underline: Option<String>,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: Some(code.to_string()),
            message: message.into(),
            file: None,
            line: None,
            col: None,
            source_line: None,
            underline: None,
            suggestions: Vec::new(),
        }
    }

    /// Attaches the fragment name, position and source line of `span`.
    pub fn at(mut self, span: Span, sources: &SourceManager) -> Self {
        if span.is_dummy() {
            return self;
        }
        if let Some(fragment) = sources.fragment_at(span) {
            self.file = Some(fragment.name.clone());
        }
        self.line = Some(span.line);
        self.col = Some(span.col);
        if let Some(text) = sources.line_text(span) {
            let remaining = text.chars().count().saturating_sub(span.col.saturating_sub(1));
            let len = span.end.saturating_sub(span.start).min(remaining);
            self.underline = Some(make_underline(span.col, len));
            self.source_line = Some(text.to_string());
        }
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn render_ansi(&self) -> String {
        self.render(Style::Ansi)
    }

    /// Uncolored rendering, for tests and piped output.
    pub fn render_plain(&self) -> String {
        self.render(Style::Plain)
    }

    fn render(&self, style: Style) -> String {
        let mut out = String::new();
        let (label, color) = match self.severity {
            Severity::Error => ("error", RED),
            Severity::Warning => ("warning", YELLOW),
            Severity::Note => ("note", CYAN),
        };
        let head = match &self.code {
            Some(code) => format!("{}[{}]", style.paint(color, label), style.paint(BOLD, code)),
            None => style.paint(color, label),
        };
        let _ = writeln!(out, "{}: {}", head, style.paint(BOLD, &self.message));

        if let (Some(file), Some(line), Some(col)) = (&self.file, self.line, self.col) {
            let _ = writeln!(out, "  {} {}:{}:{}", style.paint(CYAN, "-->"), file, line, col);
        }

        let gutter = style.paint(CYAN, "|");
        if let (Some(line), Some(text), Some(underline)) =
            (self.line, &self.source_line, &self.underline)
        {
            let number = style.paint(CYAN, &format!("{:>3}", line));
            let _ = writeln!(out, "   {}", gutter);
            let _ = writeln!(out, "{} {} {}", number, gutter, text);
            let _ = writeln!(out, "   {} {}", gutter, style.paint(RED, underline));
        }

        if !self.suggestions.is_empty() {
            let _ = writeln!(out, "   {}", gutter);
            for suggestion in &self.suggestions {
                let (eq, help) = (style.paint(CYAN, "="), style.paint(CYAN, "help"));
                let _ = writeln!(out, "   {} {}: {}", eq, help, suggestion);
            }
        }
        out
    }
}

// ── Rendering ───────────────────────────────────────────────────────

const RED: &str = "31";
const YELLOW: &str = "33";
const CYAN: &str = "36";
const BOLD: &str = "1";

#[derive(Clone, Copy)]
enum Style {
    Plain,
    Ansi,
}

impl Style {
    fn paint(self, sgr: &str, text: &str) -> String {
        match self {
            Style::Plain => text.to_string(),
            Style::Ansi => format!("\x1b[{}m{}\x1b[0m", sgr, text),
        }
    }
}

fn make_underline(col: usize, len: usize) -> String {
    let mut line = " ".repeat(col.saturating_sub(1));
    line.push_str(&"^".repeat(len.max(1)));
    line
}

// ── Suggestions ─────────────────────────────────────────────────────

/// Levenshtein distance over chars, two rows at a time.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != *cb);
            cur[j + 1] = substitute.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Up to three candidates within `max_distance` of `name`, closest first.
fn suggest_similar(name: &str, candidates: &[&str], max_distance: usize) -> Vec<String> {
    let mut ranked: Vec<(usize, &str)> = candidates
        .iter()
        .copied()
        .filter(|c| *c != name)
        .filter_map(|c| {
            let d = edit_distance(name, c);
            (d <= max_distance).then_some((d, c))
        })
        .collect();
    ranked.sort();
    ranked.truncate(3);
    ranked.into_iter().map(|(_, c)| format!("did you mean '{}'?", c)).collect()
}

const KEYWORDS: &[&str] = &[
    "void", "bool", "char", "short", "int", "long", "unsigned", "signed", "float", "double", "auto",
    "struct", "class", "enum", "typedef", "static", "extern", "const", "if", "else", "while", "do",
    "for", "break", "continue", "return", "sizeof", "true", "false", "nullptr",
];

const BUILTINS: &[&str] = &[
    "printf", "puts", "putchar", "abs", "labs", "fabs", "sqrt", "pow", "floor", "ceil", "strlen",
];

/// Diagnostics for `error`, positioned against `sources`.
pub fn format_compile_error(error: &CompileError, sources: &SourceManager) -> Vec<Diagnostic> {
    match error {
        CompileError::Lex(e) => vec![format_lex_error(e).at(e.span(), sources)],
        CompileError::Parse(e) => vec![format_parse_error(e).at(e.span(), sources)],
        CompileError::Sema(errors) => errors
            .iter()
            .map(|e| {
                let diag = Diagnostic::error("E0200", e.message.clone()).at(e.span, sources);
                match undeclared_name(&e.message) {
                    Some(name) => {
                        let candidates: Vec<&str> =
                            KEYWORDS.iter().chain(BUILTINS).copied().collect();
                        diag.with_suggestions(suggest_similar(name, &candidates, 2))
                    }
                    None => diag,
                }
            })
            .collect(),
        CompileError::Codegen(e) => {
            vec![Diagnostic::error("E0300", e.to_string()).at(e.span(), sources)]
        }
        CompileError::Include { message, span } => {
            vec![Diagnostic::error("E0020", message.clone()).at(*span, sources)]
        }
        CompileError::Rewrite(e) => vec![Diagnostic::error("E0400", e.to_string())],
        CompileError::Io { .. } => vec![Diagnostic::error("E0500", error.to_string())],
        CompileError::Buffer(_) | CompileError::Internal(_) => {
            vec![Diagnostic::error("E0900", error.to_string())]
        }
    }
}

fn undeclared_name(message: &str) -> Option<&str> {
    message.strip_prefix("use of undeclared identifier '")?.strip_suffix('\'')
}

fn format_lex_error(error: &LexError) -> Diagnostic {
    let code = match error {
        LexError::UnexpectedChar { .. } => "E0001",
        LexError::UnterminatedString { .. } | LexError::UnterminatedChar { .. } => "E0002",
        LexError::UnterminatedComment { .. } => "E0003",
        LexError::InvalidNumber { .. } | LexError::InvalidEscape { .. } => "E0004",
        LexError::UnsupportedDirective { .. } | LexError::MalformedInclude { .. } => "E0005",
    };
    Diagnostic::error(code, error.to_string())
}

fn format_parse_error(error: &ParseError) -> Diagnostic {
    match error {
        ParseError::Unexpected { found, .. } if found == "end of input" => {
            Diagnostic::error("E0010", error.to_string())
                .with_suggestions(vec!["check for a missing '}' or ';'".to_string()])
        }
        ParseError::Unexpected { .. } => Diagnostic::error("E0010", error.to_string()),
        ParseError::NestedFunction { name, .. } => Diagnostic::error("E0011", error.to_string())
            .with_suggestions(vec![format!("define '{}' in its own input", name)]),
        ParseError::Unsupported { .. } => Diagnostic::error("E0012", error.to_string()),
        ParseError::Invalid { .. } => Diagnostic::error("E0013", error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;

    #[test]
    fn underline_covers_the_span() {
        assert_eq!(make_underline(3, 2), "  ^^");
        assert_eq!(make_underline(1, 0), "^");
    }

    #[test]
    fn edit_distance_counts_single_edits() {
        assert_eq!(edit_distance("printf", "printf"), 0);
        assert_eq!(edit_distance("prinf", "printf"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
    }

    #[test]
    fn undeclared_builtin_typo_gets_a_suggestion() {
        let mut sources = SourceManager::new();
        sources.add_fragment("input_line_0", "void f() { prinf(\"x\"); }").unwrap();
        let errors = compile("void f() { prinf(\"x\"); }").unwrap_err();
        let diags = format_compile_error(&errors[0], &sources);
        assert_eq!(diags[0].code.as_deref(), Some("E0200"));
        assert!(diags[0].suggestions.iter().any(|s| s.contains("printf")));
    }

    #[test]
    fn plain_rendering_shows_location_and_source() {
        let mut sources = SourceManager::new();
        sources.add_fragment("input_line_0", "int x = ;").unwrap();
        let span = Span::new(0, 8, 9, 1, 9);
        let diag = Diagnostic::error("E0010", "expected expression, found ';'").at(span, &sources);
        let text = diag.render_plain();
        assert!(text.starts_with("error[E0010]: expected expression, found ';'\n"));
        assert!(text.contains("  --> input_line_0:1:9\n"));
        assert!(text.contains("  1 | int x = ;\n"));
        assert!(text.contains("   |         ^\n"));
    }
}
