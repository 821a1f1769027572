//! The interpreter session: evaluates inputs one at a time against a single
//! growing translation unit.
//!
//! Statement inputs are parsed inside a scaffold function, rewritten so that
//! their declarations become globals and their statements run in a uniquely
//! named wrapper, then parsed again for real and executed. Declarations,
//! `#include` lines and function definitions go to the parser unchanged.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use cinder_compiler::compiler::dynamic_lookup::SESSION_HANDLE_GLOBAL;
use cinder_compiler::compiler::incremental::{
    CodegenConsumer, FunctionBodyConsumer, IncrementalParser, NullConsumer, ParseFailure,
    ParsedFragment,
};
use cinder_compiler::compiler::parser::ParseError;
use cinder_compiler::compiler::rewriter::{rewrite, RewriteContext, WrappedInput};
use cinder_compiler::compiler::source::SourceManager;
use cinder_compiler::compiler::validator::{InputValidator, ValidationResult};
use cinder_compiler::{CompilationOptions, CompileError};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};

use crate::driver::{CompiledFragment, ExecutionDriver};
use crate::error::CinderError;
use crate::host::{InterpreterCallbacks, SessionHost};
use crate::translation::{DeclCategory, DeclRecord, DumpRange, TranslationState};
use crate::value_printer::PrintedValue;
use crate::vm::Vm;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub compilation: CompilationOptions,
    pub include_paths: Vec<PathBuf>,
    /// Maximum instructions one input may execute.
    pub instruction_limit: Option<u64>,
    /// Maximum number of value slots for globals and string literals.
    pub global_memory_limit: Option<u64>,
}

/// What one evaluation produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvalResult {
    /// The printed value of the final expression, if it was printed.
    pub value: Option<PrintedValue>,
    /// Program output, including the printed value line.
    pub output: String,
    pub entry: Option<String>,
}

impl EvalResult {
    fn absorb(&mut self, other: EvalResult) {
        self.output.push_str(&other.output);
        if other.value.is_some() {
            self.value = other.value;
        }
        if other.entry.is_some() {
            self.entry = other.entry;
        }
    }
}

struct SessionState {
    options: SessionOptions,
    input_counter: u64,
    dynamic_counter: u64,
    callbacks: Option<Rc<dyn InterpreterCallbacks>>,
    transcript: String,
    poisoned: Option<CinderError>,
}

/// Session state shared with the runtime host. Each part is borrowed
/// separately so that code running in the VM can re-enter the parser.
pub(crate) struct SessionCore {
    pub(crate) parser: RefCell<IncrementalParser>,
    vm: RefCell<Vm>,
    translation: RefCell<TranslationState>,
    state: RefCell<SessionState>,
}

pub struct Session {
    core: Rc<ReentrantMutex<SessionCore>>,
    handle: u64,
}

impl Session {
    pub fn new(options: SessionOptions) -> Result<Self, CinderError> {
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        let mut parser = IncrementalParser::new();
        parser.install_runtime_universe();
        for path in &options.include_paths {
            parser.add_include_path(path);
        }
        let mut vm = Vm::new();
        if let Some(limit) = options.instruction_limit {
            vm.set_instruction_limit(limit);
        }
        if let Some(slots) = options.global_memory_limit {
            vm.set_global_memory_limit(slots);
        }
        let dynamic = options.compilation.dynamic_scoping;
        let core = Rc::new(ReentrantMutex::new(SessionCore {
            parser: RefCell::new(parser),
            vm: RefCell::new(vm),
            translation: RefCell::new(TranslationState::new()),
            state: RefCell::new(SessionState {
                options,
                input_counter: 0,
                dynamic_counter: 0,
                callbacks: None,
                transcript: String::new(),
                poisoned: None,
            }),
        }));

        {
            let guard = core.lock();
            let host = SessionHost::new(Rc::downgrade(&core), handle);
            guard.vm.borrow_mut().set_host(Rc::new(host));
            let handle_decl =
                format!("void *{} = (void *)0x{:x};", SESSION_HANDLE_GLOBAL, handle);
            guard.compile_string(&handle_decl)?;
            guard.parser.borrow_mut().set_dynamic_lookup(dynamic);
        }
        tracing::debug!(handle, dynamic, "session created");
        Ok(Self { core, handle })
    }

    /// Value of the session handle global.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Evaluates one interactive input.
    pub fn evaluate(&self, input: &str) -> Result<EvalResult, CinderError> {
        self.guarded(|core| core.evaluate(input))
    }

    /// Parses, compiles and runs `source` as top-level code, without any
    /// statement rewriting.
    pub fn compile_string(&self, source: &str) -> Result<EvalResult, CinderError> {
        self.guarded(|core| core.compile_string(source))
    }

    pub fn add_include_path(&self, path: impl Into<PathBuf>) {
        let guard = self.core.lock();
        let path = path.into();
        guard.parser.borrow_mut().add_include_path(path.clone());
        guard.state.borrow_mut().options.include_paths.push(path);
    }

    /// Loads a source file into the translation unit, once.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EvalResult, CinderError> {
        let path = path.as_ref();
        self.guarded(|core| core.load_file(path))
    }

    /// Loads `dir/name.C` and calls `name(args)`, for specs of the form
    /// `dir/name.C(args)`.
    pub fn execute_file(&self, spec: &str) -> Result<EvalResult, CinderError> {
        let (file, args) = split_file_call(spec)?;
        let stem = Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| CinderError::Io {
                path: file.to_string(),
                message: "file name has no stem".into(),
            })?
            .to_string();
        self.guarded(|core| {
            let mut result = core.load_file(Path::new(file))?;
            result.absorb(core.evaluate(&format!("{}({});", stem, args))?);
            Ok(result)
        })
    }

    /// Source of committed declarations in `range`.
    pub fn dump_decls(&self, range: DumpRange) -> String {
        let guard = self.core.lock();
        let mut translation = guard.translation.borrow_mut();
        translation.dump(range).iter().map(|d| format!("{}\n", d.text)).collect()
    }

    /// Committed declarations in `range`.
    pub fn decls(&self, range: DumpRange) -> Vec<DeclRecord> {
        let guard = self.core.lock();
        let mut translation = guard.translation.borrow_mut();
        translation.dump(range).to_vec()
    }

    /// Number of committed declarations.
    pub fn decl_count(&self) -> usize {
        self.core.lock().translation.borrow().len()
    }

    /// Declarations committed after the first `start`. Leaves the dump marker alone.
    pub fn decls_from(&self, start: usize) -> Vec<DeclRecord> {
        let guard = self.core.lock();
        let translation = guard.translation.borrow();
        translation.iter().skip(start).map(|(_, d)| d.clone()).collect()
    }

    /// Turns runtime resolution of unknown names on or off for later inputs.
    pub fn set_dynamic_lookup(&self, enabled: bool) {
        let guard = self.core.lock();
        guard.parser.borrow_mut().set_dynamic_lookup(enabled);
        guard.state.borrow_mut().options.compilation.dynamic_scoping = enabled;
    }

    pub fn is_dynamic_lookup_enabled(&self) -> bool {
        self.core.lock().parser.borrow().is_dynamic_lookup_enabled()
    }

    pub fn set_callbacks(&self, callbacks: Option<Rc<dyn InterpreterCallbacks>>) {
        self.core.lock().state.borrow_mut().callbacks = callbacks;
    }

    pub fn set_options(&self, compilation: CompilationOptions) {
        let guard = self.core.lock();
        guard.parser.borrow_mut().set_dynamic_lookup(compilation.dynamic_scoping);
        guard.state.borrow_mut().options.compilation = compilation;
    }

    pub fn options(&self) -> SessionOptions {
        self.core.lock().state.borrow().options.clone()
    }

    /// Write program output to stdout as it is produced.
    pub fn set_echo(&self, echo: bool) {
        self.core.lock().vm.borrow_mut().set_echo(echo);
    }

    /// Address of the global `name`, if it was ever defined.
    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.core.lock().vm.borrow().global_address(name)
    }

    /// All program output produced by the session so far.
    pub fn output(&self) -> String {
        self.core.lock().state.borrow().transcript.clone()
    }

    /// Fragments in the source buffer, for diagnostics.
    pub fn with_sources<R>(&self, f: impl FnOnce(&SourceManager) -> R) -> R {
        let guard = self.core.lock();
        let parser = guard.parser.borrow();
        f(parser.sources())
    }

    fn guarded(
        &self,
        f: impl FnOnce(&SessionCore) -> Result<EvalResult, CinderError>,
    ) -> Result<EvalResult, CinderError> {
        let guard = self.core.lock();
        if let Some(fatal) = &guard.state.borrow().poisoned {
            return Err(fatal.clone());
        }
        let result = f(&guard);
        guard.parser.borrow_mut().clear_dynamic_records();
        match &result {
            Ok(eval) => guard.state.borrow_mut().transcript.push_str(&eval.output),
            Err(err) if err.is_fatal() => {
                tracing::error!(error = %err, "session poisoned");
                guard.state.borrow_mut().poisoned = Some(err.clone());
            }
            Err(_) => {}
        }
        result
    }
}

impl SessionCore {
    pub(crate) fn callbacks(&self) -> Option<Rc<dyn InterpreterCallbacks>> {
        self.state.borrow().callbacks.clone()
    }

    pub(crate) fn next_dynamic_id(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.dynamic_counter += 1;
        state.dynamic_counter
    }

    fn next_input_id(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.input_counter += 1;
        state.input_counter
    }

    fn evaluate(&self, input: &str) -> Result<EvalResult, CinderError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(EvalResult::default());
        }
        if trimmed.starts_with("#include") {
            return self.compile_string(input);
        }
        let validation = InputValidator::new().validate(input);
        if validation != ValidationResult::Valid {
            return Err(CinderError::InvalidInput {
                code: validation.code(),
                message: validation.describe().to_string(),
            });
        }

        let options = self.state.borrow().options.compilation.clone();
        let id = self.next_input_id();
        let entry = format!("__cinder_input_line_{}", id);
        let wrapped = if options.declaration_extraction {
            match self.wrap_input(input, id, &entry, &options)? {
                Some(wrapped) => wrapped,
                None => return self.compile_string(input),
            }
        } else {
            WrappedInput {
                globals: Vec::new(),
                body: vec![input.to_string(), ";".to_string()],
                final_stmt: None,
                entry: Some(entry),
            }
        };

        let source = wrapped.source();
        if options.debug {
            tracing::info!(source = %source, "wrapped input");
        } else {
            tracing::debug!(source = %source, "wrapped input");
        }
        let fragment = self.compile(&source, wrapped.entry.as_deref(), options.codegen)?;
        self.run(fragment)
    }

    /// Parses `input` inside a scaffold function and rewrites its
    /// statements. `None` means the input must be parsed at top level.
    fn wrap_input(
        &self,
        input: &str,
        id: u64,
        entry: &str,
        options: &CompilationOptions,
    ) -> Result<Option<WrappedInput>, CinderError> {
        let scaffold_name = format!("__cinder_stmt_vs_decl_{}", id);
        let scaffold = format!("void {}() {{\n{}\n;}}", scaffold_name, input);
        let mut parser = self.parser.borrow_mut();
        let mut consumer = FunctionBodyConsumer::new(&scaffold_name);
        let parsed = parser.with_suppressed_diagnostics(|p| p.parse(&scaffold, &mut consumer));
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(failure) if defines_function(&failure) => {
                tracing::debug!(input, "input defines a function, parsing at top level");
                return Ok(None);
            }
            Err(failure) => return Err(CinderError::from_parse_failure(failure, parser.sources())),
        };
        let body = consumer.into_body().unwrap_or_default();
        let trimmed = input.trim_end();
        let wrapped = {
            let ctx = RewriteContext {
                sources: parser.sources(),
                types: parser.sema().types(),
                dirty: &parsed.dirty,
                value_printing: options.value_printing,
                has_semicolon: trimmed.ends_with(';'),
                entry_name: entry,
            };
            rewrite(&body, &ctx)
        };
        parser.rollback();
        let wrapped = wrapped.map_err(|e| CinderError::Internal(e.to_string()))?;
        Ok(Some(wrapped))
    }

    /// Runs the real parse of `source`, with code generation unless only
    /// checking.
    fn compile(
        &self,
        source: &str,
        entry: Option<&str>,
        codegen: bool,
    ) -> Result<CompiledFragment, CinderError> {
        let mut parser = self.parser.borrow_mut();
        let mut codegen_consumer = CodegenConsumer::new();
        let mut null_consumer = NullConsumer;
        let parsed = if codegen {
            parser.parse(source, &mut codegen_consumer)
        } else {
            parser.parse(source, &mut null_consumer)
        };
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(failure) => return Err(CinderError::from_parse_failure(failure, parser.sources())),
        };
        parser.commit();
        let decls = decl_records(&parsed, parser.sources(), entry);
        let entry = if codegen { entry.map(String::from) } else { None };
        Ok(CompiledFragment { module: codegen_consumer.into_module(), decls, entry })
    }

    fn run(&self, fragment: CompiledFragment) -> Result<EvalResult, CinderError> {
        let mut vm = self.vm.borrow_mut();
        let mut translation = self.translation.borrow_mut();
        let mut driver = ExecutionDriver::new(&mut vm, &mut translation);
        let outcome = driver.run(fragment).and_then(|entry| {
            if let Some(entry) = &entry {
                driver.execute(entry)?;
            }
            Ok(entry)
        });
        let output = vm.take_output();
        let value = vm.take_printed().pop();
        let entry = outcome?;
        Ok(EvalResult { value, output, entry })
    }

    fn compile_string(&self, source: &str) -> Result<EvalResult, CinderError> {
        let codegen = self.state.borrow().options.compilation.codegen;
        let fragment = self.compile(source, None, codegen)?;
        self.run(fragment)
    }

    fn load_file(&self, path: &Path) -> Result<EvalResult, CinderError> {
        let io_error = |message: &str| CinderError::Io {
            path: path.display().to_string(),
            message: message.to_string(),
        };
        if matches!(path.extension().and_then(|e| e.to_str()), Some("so" | "dylib" | "dll")) {
            return Err(io_error("loading shared libraries is not supported"));
        }
        let on_search_path =
            || self.parser.borrow().include_paths().iter().any(|dir| dir.join(path).is_file());
        let found = path.is_file() || (path.is_relative() && on_search_path());
        if !found {
            return Err(io_error("file not found"));
        }
        tracing::info!(path = %path.display(), "loading file");
        let text = path.to_string_lossy().replace('\\', "\\\\").replace('"', "\\\"");
        self.compile_string(&format!("#include \"{}\"\n", text))
    }
}

fn defines_function(failure: &ParseFailure) -> bool {
    failure
        .errors
        .iter()
        .any(|e| matches!(e, CompileError::Parse(ParseError::NestedFunction { .. })))
}

/// Records for the declarations `parsed` contributes, minus the wrapper.
fn decl_records(
    parsed: &ParsedFragment,
    sources: &SourceManager,
    entry: Option<&str>,
) -> Vec<DeclRecord> {
    let mut records = Vec::new();
    for group in &parsed.groups {
        let text = sources.slice(group.span).unwrap_or_default().trim().to_string();
        for decl in &group.decls {
            let Some(name) = decl.name() else { continue };
            if Some(name) == entry {
                continue;
            }
            records.push(DeclRecord {
                name: name.to_string(),
                category: DeclCategory::of(decl),
                text: text.clone(),
                fragment: parsed.name.clone(),
            });
        }
    }
    records
}

/// Splits `dir/name.C(args)` into the file and the argument text.
fn split_file_call(spec: &str) -> Result<(&str, &str), CinderError> {
    let spec = spec.trim();
    match spec.find('(') {
        None => Ok((spec, "")),
        Some(open) => {
            let args = spec[open + 1..].strip_suffix(')').ok_or_else(|| CinderError::InvalidInput {
                code: ValidationResult::Incomplete.code(),
                message: format!("missing ')' in '{}'", spec),
            })?;
            Ok((spec[..open].trim_end(), args))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_calls_split_at_the_first_paren() {
        assert_eq!(split_file_call("macros/fit.C(1, 2)").unwrap(), ("macros/fit.C", "1, 2"));
        assert_eq!(split_file_call("run.C").unwrap(), ("run.C", ""));
        assert!(split_file_call("run.C(1").is_err());
    }

    #[test]
    fn declarations_are_recorded_without_the_entry() {
        let session = Session::new(SessionOptions::default()).unwrap();
        session.evaluate("int counter = 3;").unwrap();
        session.evaluate("counter++;").unwrap();
        let decls = session.decls(DumpRange::All);
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"counter"));
        assert!(!names.iter().any(|n| n.starts_with("__cinder_input_line_")));
    }

    #[test]
    fn sessions_get_distinct_handles() {
        let a = Session::new(SessionOptions::default()).unwrap();
        let b = Session::new(SessionOptions::default()).unwrap();
        assert_ne!(a.handle(), b.handle());
        assert!(a.address_of(SESSION_HANDLE_GLOBAL).is_some());
    }
}
