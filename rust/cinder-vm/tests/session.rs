//! Interactive evaluation through the session.

use std::cell::RefCell;
use std::rc::Rc;

use cinder_compiler::{CompilationOptions, ValuePrinting};
use cinder_vm::{
    CinderError, DumpRange, EvalResult, HostValue, InterpreterCallbacks, Session, SessionOptions,
};

fn session() -> Session {
    Session::new(SessionOptions::default()).expect("session should start")
}

fn printed(result: &EvalResult) -> Option<&str> {
    result.value.as_ref().map(|v| v.text.as_str())
}

// ─── Declarations and values ───

#[test]
fn declarations_persist_as_globals() {
    let s = session();
    let decl = s.evaluate("int x = 5;").unwrap();
    assert_eq!(printed(&decl), None);
    let use_it = s.evaluate("x + 1").unwrap();
    assert_eq!(printed(&use_it), Some("(int) 6"));
    assert!(s.address_of("x").is_some());
}

#[test]
fn trailing_semicolon_suppresses_the_printed_value() {
    let s = session();
    let bare = s.evaluate("2 + 2").unwrap();
    assert_eq!(printed(&bare), Some("(int) 4"));
    assert_eq!(bare.output, "(int) 4\n");

    let terminated = s.evaluate("2 + 2;").unwrap();
    assert_eq!(printed(&terminated), None);
    assert_eq!(terminated.output, "");
}

#[test]
fn list_initializers_assign_in_order_and_print_the_last() {
    let s = session();
    let result = s.evaluate("int a[3] = {1, 2, 3}").unwrap();
    assert_eq!(printed(&result), Some("(int) 3"));
    let sum = s.evaluate("a[0] * 100 + a[1] * 10 + a[2]").unwrap();
    assert_eq!(printed(&sum), Some("(int) 123"));
}

#[test]
fn record_list_initializers_print_the_last_field() {
    let s = session();
    let result = s.evaluate("struct P { int a; int b; }; P pp = {1, 2}").unwrap();
    assert_eq!(printed(&result), Some("(int) 2"));
    assert_eq!(printed(&s.evaluate("pp.a * 10 + pp.b").unwrap()), Some("(int) 12"));
}

#[test]
fn trailing_compound_statements_print_nothing() {
    let s = session();
    s.evaluate("int n = 0;").unwrap();
    let result = s.evaluate("if (n == 0) { n = 4; }").unwrap();
    assert_eq!(printed(&result), None);
    assert_eq!(printed(&s.evaluate("n").unwrap()), Some("(int) 4"));
}

#[test]
fn oversized_globals_fail_and_leave_the_session_usable() {
    let s = session();
    let err = s.evaluate("int big[2000000000];").unwrap_err();
    assert!(err.to_string().contains("out of global memory"), "{err}");
    s.evaluate("int small = 3;").unwrap();
    assert_eq!(printed(&s.evaluate("small * 2").unwrap()), Some("(int) 6"));
}

#[test]
fn statements_run_in_a_fresh_wrapper_each_time() {
    let s = session();
    let mut entries = std::collections::HashSet::new();
    for i in 0..200 {
        let result = s.evaluate(&format!("{} * 2;", i)).unwrap();
        let entry = result.entry.expect("statement input should have an entry");
        assert!(entries.insert(entry), "entry names must be unique");
    }
}

#[test]
fn functions_are_defined_at_top_level() {
    let s = session();
    let def = s.evaluate("int sq(int v) { return v * v; }").unwrap();
    assert_eq!(def.entry, None);
    let call = s.evaluate("sq(7)").unwrap();
    assert_eq!(printed(&call), Some("(int) 49"));
}

#[test]
fn floating_point_values_keep_a_decimal_point() {
    let s = session();
    assert_eq!(printed(&s.evaluate("1.5 * 2").unwrap()), Some("(double) 3.0"));
}

#[test]
fn program_output_is_collected() {
    let s = session();
    let result = s.evaluate(r#"printf("hello %d\n", 3);"#).unwrap();
    assert_eq!(result.output, "hello 3\n");
    s.evaluate(r#"puts("again");"#).unwrap();
    assert_eq!(s.output(), "hello 3\nagain\n");
}

// ─── Value printing modes ───

#[test]
fn value_printing_can_be_forced_or_disabled() {
    let s = session();
    s.set_options(CompilationOptions {
        value_printing: ValuePrinting::Enabled,
        ..CompilationOptions::default()
    });
    assert_eq!(printed(&s.evaluate("2 + 3;").unwrap()), Some("(int) 5"));

    s.set_options(CompilationOptions {
        value_printing: ValuePrinting::Disabled,
        ..CompilationOptions::default()
    });
    assert_eq!(printed(&s.evaluate("2 + 3").unwrap()), None);
}

// ─── Failure isolation ───

#[test]
fn syntax_errors_leave_the_session_usable() {
    let s = session();
    let err = s.evaluate("int broken = ;").unwrap_err();
    assert!(matches!(err, CinderError::Syntax { .. }), "unexpected error: {err}");
    assert!(!err.diagnostics().is_empty());
    assert_eq!(printed(&s.evaluate("1 + 2").unwrap()), Some("(int) 3"));
}

#[test]
fn unbalanced_input_is_rejected_with_its_code() {
    let s = session();
    match s.evaluate("if (1) {").unwrap_err() {
        CinderError::InvalidInput { code, .. } => assert_eq!(code, 1),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(printed(&s.evaluate("7").unwrap()), Some("(int) 7"));
}

#[test]
fn type_errors_do_not_commit_declarations() {
    let s = session();
    assert!(s.evaluate("int f() { return \"text\" * 2; }").is_err());
    let ok = s.evaluate("int f() { return 2; }").unwrap();
    assert_eq!(ok.entry, None);
    assert_eq!(printed(&s.evaluate("f()").unwrap()), Some("(int) 2"));
}

#[test]
fn runtime_errors_are_recoverable() {
    let s = session();
    s.evaluate("int zero = 0;").unwrap();
    let err = s.evaluate("10 / zero").unwrap_err();
    assert_eq!(err.kind(), "runtime");
    assert_eq!(printed(&s.evaluate("zero + 1").unwrap()), Some("(int) 1"));
}

// ─── Dynamic lookup ───

#[derive(Default)]
struct Recorder {
    evals: RefCell<Vec<(String, Vec<u64>)>>,
}

impl InterpreterCallbacks for Recorder {
    fn lookup_object(&self, name: &str) -> Option<HostValue> {
        (name == "gHostValue").then_some(HostValue::Long(10))
    }

    fn on_dynamic_eval(&self, template: &str, addrs: &[u64]) {
        self.evals.borrow_mut().push((template.to_string(), addrs.to_vec()));
    }
}

#[test]
fn unknown_names_resolve_at_run_time_once() {
    let s = session();
    let recorder = Rc::new(Recorder::default());
    s.set_callbacks(Some(recorder.clone()));
    s.evaluate("long y = 4;").unwrap();

    let result = s.evaluate("y + gHostValue").unwrap();
    assert_eq!(printed(&result), Some("(long) 14"));

    let evals = recorder.evals.borrow();
    assert_eq!(evals.len(), 1);
    assert_eq!(evals[0].0, "(*(long *)@) + gHostValue");
    assert_eq!(evals[0].1, vec![s.address_of("y").unwrap()]);
}

#[test]
fn unresolvable_names_fail_at_run_time() {
    let s = session();
    let err = s.evaluate("missingName + 1").unwrap_err();
    assert!(matches!(err, CinderError::UnresolvedSymbol(_)), "unexpected error: {err}");
    assert_eq!(printed(&s.evaluate("1").unwrap()), Some("(int) 1"));
}

#[test]
fn detaching_dynamic_lookup_makes_unknown_names_errors() {
    let s = session();
    s.set_dynamic_lookup(false);
    assert!(!s.is_dynamic_lookup_enabled());
    let err = s.evaluate("missingName + 1").unwrap_err();
    assert!(err.to_string().contains("use of undeclared identifier 'missingName'"));
    s.set_dynamic_lookup(true);
    assert!(matches!(s.evaluate("missingName + 1").unwrap_err(), CinderError::UnresolvedSymbol(_)));
}

// ─── Files ───

#[test]
fn includes_are_found_on_the_include_path() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("util.h"), "int twice(int v) { return 2 * v; }\n").unwrap();
    let s = session();
    s.add_include_path(dir.path());
    s.evaluate("#include \"util.h\"").unwrap();
    s.evaluate("#include \"util.h\"").unwrap();
    assert_eq!(printed(&s.evaluate("twice(21)").unwrap()), Some("(int) 42"));
}

#[test]
fn load_file_and_execute_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.C");
    std::fs::write(&path, "int hello(int n) { printf(\"hello %d\\n\", n); return n; }\n").unwrap();
    let s = session();
    let result = s.execute_file(&format!("{}(5)", path.display())).unwrap();
    assert_eq!(result.output, "hello 5\n");
    assert_eq!(printed(&result), None);

    let again = s.load_file(&path).unwrap();
    assert_eq!(again.output, "");
}

#[test]
fn shared_libraries_and_missing_files_are_io_errors() {
    let s = session();
    assert!(matches!(s.load_file("libphysics.so").unwrap_err(), CinderError::Io { .. }));
    assert!(matches!(s.load_file("/no/such/file.C").unwrap_err(), CinderError::Io { .. }));
}

// ─── History ───

#[test]
fn dump_ranges_follow_commits() {
    let s = session();
    s.dump_decls(DumpRange::All);
    s.evaluate("int a1 = 1;").unwrap();
    s.evaluate("int a2 = 2;").unwrap();
    assert_eq!(s.dump_decls(DumpRange::SincePreviousDump), "int a1 = 1;\nint a2 = 2;\n");
    assert_eq!(s.dump_decls(DumpRange::SincePreviousDump), "");
    assert_eq!(s.dump_decls(DumpRange::Last(1)), "int a2 = 2;\n");
}
