//! `cinder check`: compile a whole file without running it.

use std::path::PathBuf;

use cinder_compiler::compiler::incremental::{CodegenConsumer, IncrementalParser};
use cinder_compiler::compiler::lir::LirModule;
use cinder_compiler::diagnostics::{format_compile_error, Diagnostic};

/// Compiles `text` as one translation unit named `name`. Unknown names are
/// errors here since nothing will be around to resolve them.
pub fn check_source(
    name: &str,
    text: &str,
    include_paths: &[PathBuf],
) -> Result<LirModule, Vec<Diagnostic>> {
    let mut parser = IncrementalParser::new();
    parser.install_runtime_universe();
    parser.set_dynamic_lookup(false);
    for path in include_paths {
        parser.add_include_path(path.clone());
    }

    let mut codegen = CodegenConsumer::new();
    match parser.parse_named(name, text, &mut codegen) {
        Ok(_) => {
            parser.commit();
            Ok(codegen.into_module())
        }
        Err(failure) => Err(failure
            .errors
            .iter()
            .flat_map(|e| format_compile_error(e, parser.sources()))
            .collect()),
    }
}

pub fn emit_json(module: &LirModule) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_file_produces_a_module() {
        let module = check_source("sq.c", "int sq(int v) { return v * v; }\n", &[]).unwrap();
        assert!(module.function("sq").is_some());
        let json = emit_json(&module).unwrap();
        assert!(json.contains("\"sq\""));
    }

    #[test]
    fn unknown_names_are_reported_with_the_file_name() {
        let diagnostics = check_source("bad.c", "int f() { return missing; }\n", &[]).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        let rendered = diagnostics[0].render_plain();
        assert!(rendered.contains("use of undeclared identifier 'missing'"), "{rendered}");
        assert!(rendered.contains("bad.c"), "{rendered}");
    }
}
