//! Errors surfaced by the interpreter session.

use cinder_compiler::compiler::incremental::ParseFailure;
use cinder_compiler::compiler::source::SourceManager;
use cinder_compiler::diagnostics::{format_compile_error, Diagnostic};
use cinder_compiler::CompileError;
use thiserror::Error;

use crate::vm::VmError;

#[derive(Debug, Clone, Error)]
pub enum CinderError {
    /// The input did not parse or type-check.
    #[error("{message}")]
    Syntax { message: String, diagnostics: Vec<Diagnostic> },
    #[error("invalid input: {message} (code {code})")]
    InvalidInput { code: i32, message: String },
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),
    #[error("{message}")]
    CodeGen { message: String, diagnostics: Vec<Diagnostic> },
    #[error("{0}")]
    Runtime(VmError),
    /// A broken invariant of the interpreter itself. Poisons the session.
    #[error("internal error: {0}")]
    Internal(String),
    #[error("cannot load '{path}': {message}")]
    Io { path: String, message: String },
}

impl CinderError {
    /// Converts a failed parse, rendering diagnostics against `sources`.
    pub fn from_parse_failure(failure: ParseFailure, sources: &SourceManager) -> Self {
        let message = failure.to_string();
        if let Some(internal) = failure.errors.iter().find(|e| e.is_internal()) {
            return CinderError::Internal(internal.to_string());
        }
        let io = failure.errors.iter().find(|e| matches!(e, CompileError::Io { .. }));
        if let Some(CompileError::Io { path, message }) = io {
            return CinderError::Io { path: path.clone(), message: message.clone() };
        }
        let diagnostics =
            failure.errors.iter().flat_map(|e| format_compile_error(e, sources)).collect();
        if failure.errors.iter().any(|e| matches!(e, CompileError::Codegen(_))) {
            CinderError::CodeGen { message, diagnostics }
        } else {
            CinderError::Syntax { message, diagnostics }
        }
    }

    /// True when the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CinderError::Internal(_))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CinderError::Syntax { diagnostics, .. } | CinderError::CodeGen { diagnostics, .. } => {
                diagnostics
            }
            _ => &[],
        }
    }

    /// Short name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CinderError::Syntax { .. } => "syntax",
            CinderError::InvalidInput { .. } => "invalid-input",
            CinderError::UnresolvedSymbol(_) => "unresolved-symbol",
            CinderError::CodeGen { .. } => "codegen",
            CinderError::Runtime(_) => "runtime",
            CinderError::Internal(_) => "internal",
            CinderError::Io { .. } => "io",
        }
    }
}

impl From<VmError> for CinderError {
    fn from(err: VmError) -> Self {
        if err.is_unresolved() {
            CinderError::UnresolvedSymbol(err.message())
        } else {
            CinderError::Runtime(err)
        }
    }
}
