//! Incremental parsing of source fragments against one growing translation
//! unit.
//!
//! Every call appends the fragment to the [`SourceManager`], expands its
//! `#include` directives, then parses, analyses and hands each top-level
//! declaration group to a [`DeclConsumer`]. Declarations stay staged until the
//! caller commits them; a failing parse rolls everything back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::compiler::ast::*;
use crate::compiler::dynamic_lookup::{
    DynamicExprTransformer, DynamicIdHandler, UnresolvedNameHandler, UnresolvedSymbolRecord,
};
use crate::compiler::lexer::Lexer;
use crate::compiler::lir::LirModule;
use crate::compiler::lower::lower_group;
use crate::compiler::parser::{ParseError, Parser};
use crate::compiler::sema::Sema;
use crate::compiler::source::{FragmentId, SourceManager};
use crate::compiler::tokens::{Directive, Span, Token, TokenKind};
use crate::CompileError;

/// Headers whose declarations the runtime always provides.
const SYSTEM_HEADERS: &[&str] = &[
    "stdio.h", "stdlib.h", "math.h", "string.h", "stdbool.h", "stddef.h", "cstdio", "cstdlib",
    "cmath", "cstring", "iostream",
];

// ── Consumers ───────────────────────────────────────────────────────

/// Receives each analysed top-level declaration group, in source order.
pub trait DeclConsumer {
    fn handle_group(&mut self, group: &DeclGroup, sema: &Sema) -> Result<(), CompileError>;
}

/// Syntax and semantic checking only.
#[derive(Debug, Default)]
pub struct NullConsumer;

impl DeclConsumer for NullConsumer {
    fn handle_group(&mut self, _group: &DeclGroup, _sema: &Sema) -> Result<(), CompileError> {
        Ok(())
    }
}

/// Collects the body statements of one named function.
#[derive(Debug)]
pub struct FunctionBodyConsumer {
    name: String,
    body: Option<Vec<Stmt>>,
}

impl FunctionBodyConsumer {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), body: None }
    }

    pub fn into_body(self) -> Option<Vec<Stmt>> {
        self.body
    }
}

impl DeclConsumer for FunctionBodyConsumer {
    fn handle_group(&mut self, group: &DeclGroup, _sema: &Sema) -> Result<(), CompileError> {
        for decl in &group.decls {
            if let DeclKind::Function(f) = &decl.kind {
                if f.name == self.name {
                    if let Some(Stmt { kind: StmtKind::Compound(stmts), .. }) = &f.body {
                        self.body = Some(stmts.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Lowers every group into one [`LirModule`].
#[derive(Debug, Default)]
pub struct CodegenConsumer {
    module: LirModule,
}

impl CodegenConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&self) -> &LirModule {
        &self.module
    }

    pub fn into_module(self) -> LirModule {
        self.module
    }
}

impl DeclConsumer for CodegenConsumer {
    fn handle_group(&mut self, group: &DeclGroup, sema: &Sema) -> Result<(), CompileError> {
        lower_group(group, sema, &mut self.module)?;
        Ok(())
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// A fragment that parsed and analysed cleanly. Its declarations are staged.
#[derive(Debug, Clone)]
pub struct ParsedFragment {
    pub fragment: FragmentId,
    pub name: String,
    pub groups: Vec<DeclGroup>,
    /// Runtime-evaluation replacements made while parsing this fragment.
    pub records: Vec<UnresolvedSymbolRecord>,
    /// Statements rewritten by dynamic lookup.
    pub dirty: HashSet<NodeId>,
}

impl ParsedFragment {
    /// Top-level declarations, in source order.
    pub fn decls(&self) -> impl Iterator<Item = &Decl> {
        self.groups.iter().flat_map(|g| g.decls.iter())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}", first_message(.errors))]
pub struct ParseFailure {
    pub errors: Vec<CompileError>,
    /// Function whose definition was cut short by the error.
    pub neutralized: Option<String>,
}

fn first_message(errors: &[CompileError]) -> String {
    errors.first().map(|e| e.to_string()).unwrap_or_else(|| "parse failed".to_string())
}

impl ParseFailure {
    fn single(error: impl Into<CompileError>) -> Self {
        Self { errors: vec![error.into()], neutralized: None }
    }
}

// ── Parser ──────────────────────────────────────────────────────────

pub struct IncrementalParser {
    sources: SourceManager,
    sema: Sema,
    transformer: DynamicExprTransformer,
    include_paths: Vec<PathBuf>,
    included: HashSet<PathBuf>,
    staged_includes: Vec<PathBuf>,
    input_counter: u64,
    next_node_id: NodeId,
    error_count: usize,
    suppress_diagnostics: bool,
}

impl Default for IncrementalParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalParser {
    pub fn new() -> Self {
        Self {
            sources: SourceManager::new(),
            sema: Sema::new(),
            transformer: DynamicExprTransformer::new(),
            include_paths: Vec::new(),
            included: HashSet::new(),
            staged_includes: Vec::new(),
            input_counter: 0,
            next_node_id: 0,
            error_count: 0,
            suppress_diagnostics: false,
        }
    }

    pub fn sources(&self) -> &SourceManager {
        &self.sources
    }

    pub fn sema(&self) -> &Sema {
        &self.sema
    }

    pub fn add_include_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.include_paths.contains(&path) {
            tracing::debug!(path = %path.display(), "added include path");
            self.include_paths.push(path);
        }
    }

    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    /// Makes the `__cinder_*` runtime entry points visible to parsed code.
    pub fn install_runtime_universe(&mut self) {
        self.sema.install_runtime_universe();
    }

    /// Attaches or detaches the unresolved-name handler that defers lookups
    /// to run time.
    pub fn set_dynamic_lookup(&mut self, enabled: bool) {
        if enabled {
            self.sema.set_handler(Some(Box::new(DynamicIdHandler)));
        } else {
            self.sema.set_handler(None);
        }
        self.transformer.set_enabled(enabled);
    }

    pub fn is_dynamic_lookup_enabled(&self) -> bool {
        self.transformer.is_enabled()
    }

    /// Runs `f` with `handler` installed, restoring the previous handler and
    /// transformer state afterwards.
    pub fn with_handler<R>(
        &mut self,
        handler: Option<Box<dyn UnresolvedNameHandler>>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let transform = self.transformer.is_enabled();
        self.transformer.set_enabled(false);
        let previous = self.sema.set_handler(handler);
        let result = f(self);
        self.sema.set_handler(previous);
        self.transformer.set_enabled(transform);
        result
    }

    /// Runs `f` with failed parses not counted or logged.
    pub fn with_suppressed_diagnostics<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = std::mem::replace(&mut self.suppress_diagnostics, true);
        let errors_before = self.error_count;
        let result = f(self);
        self.suppress_diagnostics = previous;
        self.error_count = errors_before;
        result
    }

    /// Errors reported by the most recent parse.
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Name the next [`parse`](Self::parse) call will give its fragment.
    pub fn next_input_name(&self) -> String {
        format!("input_line_{}", self.input_counter)
    }

    pub fn commit(&mut self) {
        self.sema.commit();
        self.included.extend(self.staged_includes.drain(..));
    }

    pub fn rollback(&mut self) {
        self.sema.rollback();
        self.staged_includes.clear();
    }

    /// Forgets the replacement records of the current evaluation.
    pub fn clear_dynamic_records(&mut self) {
        self.transformer.clear();
    }

    /// Parses `text` as the next `input_line_<N>` fragment.
    pub fn parse(
        &mut self,
        text: &str,
        consumer: &mut dyn DeclConsumer,
    ) -> Result<ParsedFragment, ParseFailure> {
        let name = self.next_input_name();
        self.input_counter += 1;
        self.parse_named(&name, text, consumer)
    }

    /// Parses `text` as a fragment called `name`, such as a file path.
    pub fn parse_named(
        &mut self,
        name: &str,
        text: &str,
        consumer: &mut dyn DeclConsumer,
    ) -> Result<ParsedFragment, ParseFailure> {
        self.error_count = 0;
        let result = self.parse_inner(name, text, consumer);
        if let Err(failure) = &result {
            self.rollback();
            if !self.suppress_diagnostics {
                self.error_count = failure.errors.len();
                tracing::warn!(
                    fragment = name,
                    errors = failure.errors.len(),
                    neutralized = failure.neutralized.as_deref().unwrap_or(""),
                    "parse failed, rolled back"
                );
            }
        }
        result
    }

    fn parse_inner(
        &mut self,
        name: &str,
        text: &str,
        consumer: &mut dyn DeclConsumer,
    ) -> Result<ParsedFragment, ParseFailure> {
        let fragment = self.sources.add_fragment(name, text).map_err(ParseFailure::single)?;
        let (file, start) = match self.sources.fragment(fragment) {
            Some(frag) => (frag.file, frag.range.start),
            None => {
                return Err(ParseFailure::single(CompileError::Internal(
                    "fragment vanished".into(),
                )))
            }
        };
        tracing::debug!(fragment = name, file, "parsing fragment");

        let tokens = Lexer::new(text, file, start).tokenize().map_err(ParseFailure::single)?;
        let tokens = self.expand_includes(tokens, None).map_err(ParseFailure::single)?;

        let records_before = self.transformer.records().len();
        let mut parser =
            Parser::new(tokens, self.sema.type_names()).with_first_id(self.next_node_id);
        let mut groups = Vec::new();
        loop {
            let mut group = match parser.parse_top_level() {
                Ok(Some(group)) => group,
                Ok(None) => break,
                Err(err) => {
                    let neutralized = match &err {
                        ParseError::NestedFunction { .. } => None,
                        _ => parser.current_function().map(str::to_string),
                    };
                    return Err(ParseFailure { errors: vec![err.into()], neutralized });
                }
            };
            self.sema
                .analyze_top_level(&mut group)
                .map_err(|errors| ParseFailure::single(CompileError::Sema(errors)))?;
            if self.transformer.is_enabled() {
                self.transformer
                    .visit_group(&mut group, &self.sema)
                    .map_err(|errors| ParseFailure::single(CompileError::Sema(errors)))?;
            }
            let synthesized = self.sema.take_synthesized();
            if !synthesized.is_empty() {
                let host =
                    DeclGroup { spec: host_spec(group.span), decls: synthesized, span: group.span };
                consumer.handle_group(&host, &self.sema).map_err(ParseFailure::single)?;
            }
            consumer.handle_group(&group, &self.sema).map_err(ParseFailure::single)?;
            groups.push(group);
        }
        self.next_node_id = parser.next_id();

        Ok(ParsedFragment {
            fragment,
            name: name.to_string(),
            groups,
            records: self.transformer.records()[records_before..].to_vec(),
            dirty: self.transformer.dirty().clone(),
        })
    }

    // ── Includes ──

    /// Replaces `#include` directives with the tokens of the named file.
    /// System headers are built in and each file is included once.
    fn expand_includes(
        &mut self,
        tokens: Vec<Token>,
        base_dir: Option<&Path>,
    ) -> Result<Vec<Token>, CompileError> {
        let is_include =
            |t: &Token| matches!(t.kind, TokenKind::Directive(Directive::Include { .. }));
        if !tokens.iter().any(is_include) {
            return Ok(tokens);
        }
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            let (path, angled) = match &token.kind {
                TokenKind::Directive(Directive::Include { path, angled }) => {
                    (path.clone(), *angled)
                }
                _ => {
                    out.push(token);
                    continue;
                }
            };
            let Some(resolved) = self.resolve_include(&path, angled, base_dir) else {
                if angled && SYSTEM_HEADERS.contains(&path.as_str()) {
                    continue;
                }
                return Err(CompileError::Include {
                    message: format!("'{}' file not found", path),
                    span: token.span,
                });
            };
            let canonical = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());
            if self.included.contains(&canonical) || self.staged_includes.contains(&canonical) {
                tracing::debug!(path = %resolved.display(), "already included");
                continue;
            }
            self.staged_includes.push(canonical.clone());
            let display = resolved.display().to_string();
            let text = std::fs::read_to_string(&resolved).map_err(|e| CompileError::Io {
                path: display.clone(),
                message: e.to_string(),
            })?;
            tracing::info!(path = %resolved.display(), "including file");
            let fragment = self.sources.add_fragment_with_path(&display, &text, Some(canonical))?;
            let (file, start) = self
                .sources
                .fragment(fragment)
                .map(|f| (f.file, f.range.start))
                .ok_or_else(|| CompileError::Internal("fragment vanished".into()))?;
            let mut included = Lexer::new(&text, file, start).tokenize()?;
            included.retain(|t| !matches!(t.kind, TokenKind::Eof));
            let nested_dir = resolved.parent().map(Path::to_path_buf);
            out.extend(self.expand_includes(included, nested_dir.as_deref())?);
        }
        Ok(out)
    }

    fn resolve_include(
        &self,
        name: &str,
        angled: bool,
        base_dir: Option<&Path>,
    ) -> Option<PathBuf> {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }
        let local = if angled {
            None
        } else {
            Some(base_dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")))
        };
        local
            .into_iter()
            .chain(self.include_paths.iter().cloned())
            .map(|dir| dir.join(name))
            .find(|p| p.is_file())
    }
}

fn host_spec(span: Span) -> DeclSpec {
    DeclSpec {
        base: BaseType::Auto,
        storage: Storage::None,
        is_const: false,
        is_inline: false,
        extern_c: false,
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::dynamic_lookup::Recovery;
    use crate::compiler::sema::Constant;
    use crate::compiler::types::CType;

    #[test]
    fn fragments_are_named_in_sequence() {
        let mut p = IncrementalParser::new();
        let first = p.parse("int a = 1;", &mut NullConsumer).unwrap();
        p.commit();
        let second = p.parse("int b = a;", &mut NullConsumer).unwrap();
        assert_eq!(first.name, "input_line_0");
        assert_eq!(second.name, "input_line_1");
        assert_eq!(p.sources().fragment_text(first.fragment), Some("int a = 1;"));
    }

    #[test]
    fn failed_parse_rolls_back_staged_declarations() {
        let mut p = IncrementalParser::new();
        let failure =
            p.parse("int ok = 1; int f() { return 1 +; }", &mut NullConsumer).unwrap_err();
        assert_eq!(failure.neutralized.as_deref(), Some("f"));
        assert_eq!(p.error_count(), 1);
        assert!(p.sema().global_var("ok").is_none());
        p.parse("int ok = 2;", &mut NullConsumer).unwrap();
        p.commit();
        assert!(p.sema().global_var("ok").is_some());
        assert_eq!(p.error_count(), 0);
    }

    #[test]
    fn suppressed_failures_are_not_counted() {
        let mut p = IncrementalParser::new();
        let result = p.with_suppressed_diagnostics(|p| p.parse("int = ;", &mut NullConsumer));
        assert!(result.is_err());
        assert_eq!(p.error_count(), 0);
    }

    #[test]
    fn scaffold_body_is_collected() {
        let mut p = IncrementalParser::new();
        let mut consumer = FunctionBodyConsumer::new("scaffold");
        p.parse("void scaffold() { int x = 1; x + 2; }", &mut consumer).unwrap();
        let body = consumer.into_body().unwrap();
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0].kind, StmtKind::Decl(_)));
    }

    #[test]
    fn codegen_consumer_collects_functions() {
        let mut p = IncrementalParser::new();
        let mut consumer = CodegenConsumer::new();
        p.parse("int twice(int v) { return v * 2; } int g = 3;", &mut consumer).unwrap();
        let module = consumer.into_module();
        assert!(module.function("twice").is_some());
        assert_eq!(module.globals.len(), 1);
    }

    #[test]
    fn dynamic_lookup_defers_unknown_names() {
        let mut p = IncrementalParser::new();
        p.install_runtime_universe();
        p.parse("void* gCinder = (void*)0;", &mut NullConsumer).unwrap();
        p.commit();
        assert!(p.parse("void f() { int y = unknown + 1; }", &mut NullConsumer).is_err());
        p.set_dynamic_lookup(true);
        let parsed = p.parse("void f() { int y = unknown + 1; }", &mut NullConsumer).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].names, vec!["unknown".to_string()]);
        assert_eq!(parsed.dirty.len(), 1);
    }

    struct Fixed;

    impl UnresolvedNameHandler for Fixed {
        fn lookup_unqualified(&mut self, name: &str, _span: Span) -> Option<Recovery> {
            (name == "answer").then(|| Recovery::Bind { ty: CType::LONG, value: Constant::Int(42) })
        }
    }

    #[test]
    fn handler_bindings_reach_the_consumer_first() {
        let mut p = IncrementalParser::new();
        let mut consumer = CodegenConsumer::new();
        let parsed = p.with_handler(Some(Box::new(Fixed)), |p| {
            p.parse("long read() { return answer; }", &mut consumer)
        });
        assert!(parsed.is_ok());
        let module = consumer.into_module();
        assert_eq!(module.globals[0].name, "answer");
        assert!(module.function("read").is_some());
        assert!(!p.sema().has_handler());
    }

    #[test]
    fn includes_are_expanded_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("defs.h"), "int shared = 7;\n").unwrap();
        let mut p = IncrementalParser::new();
        p.add_include_path(dir.path());
        let source = "#include \"defs.h\"\n#include \"defs.h\"\n#include <stdio.h>\nint other = 1;";
        let parsed = p.parse(source, &mut NullConsumer).unwrap();
        p.commit();
        let names: Vec<_> = parsed.decls().filter_map(|d| d.name()).collect();
        assert_eq!(names, vec!["shared", "other"]);
        let again = p.parse("#include \"defs.h\"\n", &mut NullConsumer).unwrap();
        assert_eq!(again.decls().count(), 0);
    }

    #[test]
    fn missing_include_is_an_error() {
        let mut p = IncrementalParser::new();
        let failure = p.parse("#include \"nowhere.h\"\n", &mut NullConsumer).unwrap_err();
        assert_eq!(failure.to_string(), "'nowhere.h' file not found");
    }
}
