//! Cinder Compiler
//!
//! Front end and code generator for the incremental C interpreter: the
//! growable source buffer, the fragment parser, the statement rewriter,
//! dynamic name lookup and lowering to LIR.

pub mod compiler;
pub mod diagnostics;

use compiler::incremental::{CodegenConsumer, IncrementalParser};
use compiler::lir::LirModule;
use serde::{Deserialize, Serialize};

use thiserror::Error;

// ── Compile options ─────────────────────────────────────────────────

/// When the final expression of an input has its value printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuePrinting {
    Disabled,
    Enabled,
    /// Print only when the input does not end in `;`.
    #[default]
    Auto,
}

impl std::str::FromStr for ValuePrinting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" | "off" => Ok(ValuePrinting::Disabled),
            "enabled" | "on" => Ok(ValuePrinting::Enabled),
            "auto" => Ok(ValuePrinting::Auto),
            other => Err(format!("unknown value printing mode '{}'", other)),
        }
    }
}

/// Per-input switches for the compilation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationOptions {
    /// Promote declarations in statement inputs to globals.
    pub declaration_extraction: bool,
    pub value_printing: ValuePrinting,
    /// Resolve unknown names at run time.
    pub dynamic_scoping: bool,
    /// Log wrapped sources.
    pub debug: bool,
    /// Generate and run code; off means syntax checking only.
    pub codegen: bool,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        Self {
            declaration_extraction: true,
            value_printing: ValuePrinting::Auto,
            dynamic_scoping: true,
            debug: false,
            codegen: true,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("{0}")]
    Lex(#[from] compiler::lexer::LexError),
    #[error("{0}")]
    Parse(#[from] compiler::parser::ParseError),
    #[error("{}", sema_messages(.0))]
    Sema(Vec<compiler::sema::SemaError>),
    #[error("{0}")]
    Codegen(#[from] compiler::lower::CodegenError),
    #[error("{0}")]
    Rewrite(#[from] compiler::rewriter::RewriteError),
    #[error("{0}")]
    Buffer(#[from] compiler::source::BufferError),
    #[error("{message}")]
    Include { message: String, span: compiler::tokens::Span },
    #[error("cannot read '{path}': {message}")]
    Io { path: String, message: String },
    #[error("internal compiler error: {0}")]
    Internal(String),
}

fn sema_messages(errors: &[compiler::sema::SemaError]) -> String {
    errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ")
}

impl CompileError {
    /// Source locations the error points at, first one primary.
    pub fn spans(&self) -> Vec<compiler::tokens::Span> {
        match self {
            CompileError::Lex(e) => vec![e.span()],
            CompileError::Parse(e) => vec![e.span()],
            CompileError::Sema(errors) => errors.iter().map(|e| e.span).collect(),
            CompileError::Codegen(e) => vec![e.span()],
            CompileError::Rewrite(compiler::rewriter::RewriteError::MissingSource(span)) => {
                vec![*span]
            }
            CompileError::Include { span, .. } => vec![*span],
            CompileError::Buffer(_) | CompileError::Io { .. } | CompileError::Internal(_) => {
                Vec::new()
            }
        }
    }

    /// True for errors caused by a bug rather than by the input.
    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Buffer(_) | CompileError::Internal(_))
    }
}

/// Compiles a complete translation unit in one go.
pub fn compile(source: &str) -> Result<LirModule, Vec<CompileError>> {
    let mut parser = IncrementalParser::new();
    let mut consumer = CodegenConsumer::new();
    match parser.parse(source, &mut consumer) {
        Ok(_) => {
            parser.commit();
            Ok(consumer.into_module())
        }
        Err(failure) => Err(failure.errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_printing_parses_config_spellings() {
        assert_eq!("auto".parse::<ValuePrinting>(), Ok(ValuePrinting::Auto));
        assert_eq!("off".parse::<ValuePrinting>(), Ok(ValuePrinting::Disabled));
        assert!("sometimes".parse::<ValuePrinting>().is_err());
    }

    #[test]
    fn compile_reports_semantic_errors() {
        let errors = compile("int f() { return missing; }").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "use of undeclared identifier 'missing'");
        assert_eq!(errors[0].spans().len(), 1);
    }

    #[test]
    fn compile_produces_a_module() {
        let module = compile("int sq(int v) { return v * v; }").unwrap();
        assert_eq!(module.functions.len(), 1);
    }
}
