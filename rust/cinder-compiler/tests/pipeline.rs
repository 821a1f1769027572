//! Front-end pipeline tests: fragments, scaffold parsing, rewriting and
//! the second, real parse.

use cinder_compiler::compiler::incremental::{
    CodegenConsumer, FunctionBodyConsumer, IncrementalParser, NullConsumer,
};
use cinder_compiler::compiler::rewriter::{rewrite, RewriteContext};
use cinder_compiler::compiler::validator::{InputValidator, ValidationResult};
use cinder_compiler::ValuePrinting;

#[test]
fn buffer_growth_preserves_committed_text() {
    let mut parser = IncrementalParser::new();
    let fragments = ["int f1 = 1;", "double f2;", "int f3(int v) { return v; }"];
    let mut parsed = Vec::new();
    for text in fragments {
        parsed.push(parser.parse(text, &mut NullConsumer).expect("fragment should parse"));
        parser.commit();
    }

    let sources = parser.sources();
    assert_eq!(sources.buffer_count(), 1);
    assert_eq!(sources.buffer(0).unwrap().as_str(), fragments.concat());
    for (p, text) in parsed.iter().zip(fragments) {
        assert_eq!(sources.fragment_text(p.fragment), Some(text));
        assert_eq!(sources.slice(p.groups[0].span), Some(text));
    }
}

#[test]
fn statement_input_round_trips_through_the_rewriter() {
    let input = "int a[3] = {1, 2, 3}";
    assert_eq!(InputValidator::new().validate(input), ValidationResult::Valid);

    let mut parser = IncrementalParser::new();
    parser.install_runtime_universe();
    let scaffold = format!("void __cinder_stmt_vs_decl_1() {{\n{}\n;}}", input);
    let mut body = FunctionBodyConsumer::new("__cinder_stmt_vs_decl_1");
    let parsed = parser.parse(&scaffold, &mut body).expect("scaffold should parse");
    let stmts = body.into_body().expect("scaffold body");

    let wrapped = {
        let ctx = RewriteContext {
            sources: parser.sources(),
            types: parser.sema().types(),
            dirty: &parsed.dirty,
            value_printing: ValuePrinting::Auto,
            has_semicolon: false,
            entry_name: "__cinder_input_line_1",
        };
        rewrite(&stmts, &ctx).expect("rewrite")
    };
    parser.rollback();

    assert_eq!(wrapped.globals, vec!["int a[3];".to_string()]);
    assert_eq!(wrapped.body, vec!["a[0] = 1;".to_string(), "a[1] = 2;".to_string()]);
    assert_eq!(wrapped.final_stmt.as_deref(), Some("__cinder_print_value(a[2] = 3);"));

    let mut codegen = CodegenConsumer::new();
    parser.parse(&wrapped.source(), &mut codegen).expect("wrapped source should parse");
    parser.commit();
    let module = codegen.into_module();
    assert!(module.function("__cinder_input_line_1").is_some());
    assert!(module.globals.iter().any(|g| g.name == "a" && g.slots == 3));
}

#[test]
fn scaffold_locals_do_not_leak_after_rollback() {
    let mut parser = IncrementalParser::new();
    let scaffold = "void __cinder_stmt_vs_decl_1() {\nint tmp = 1;\n;}";
    parser.parse(scaffold, &mut NullConsumer).expect("scaffold should parse");
    parser.rollback();
    assert!(parser.sema().function_sig("__cinder_stmt_vs_decl_1").is_none());
    assert!(parser.parse("int use() { return tmp; }", &mut NullConsumer).is_err());
}
