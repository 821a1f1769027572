//! Configuration discovery, file checking and REPL command parsing.

use std::fs;
use std::path::PathBuf;

use cinder_cli::check::check_source;
use cinder_cli::config::{CinderConfig, CONFIG_FILE_NAME};
use cinder_cli::repl::{needs_more_input, parse_command, ParsedCommand, ReplCommand};
use cinder_compiler::ValuePrinting;
use cinder_vm::Session;

// ─── Config discovery ───

#[test]
fn config_is_found_in_an_ancestor_directory() {
    let root = tempfile::tempdir().unwrap();
    let nested = root.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();
    let text = "[session]\nvalue_printing = \"disabled\"\n";
    fs::write(root.path().join(CONFIG_FILE_NAME), text).unwrap();

    let found = CinderConfig::find(&nested, None).expect("config should be found");
    assert_eq!(found, root.path().join(CONFIG_FILE_NAME));
    let cfg = CinderConfig::load_from(&found).unwrap();
    assert_eq!(cfg.session.value_printing, Some(ValuePrinting::Disabled));
}

#[test]
fn global_config_is_the_fallback() {
    let project = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();
    let global_dir = home.path().join(".config").join("cinder");
    fs::create_dir_all(&global_dir).unwrap();
    let text = "[repl]\nstartup = [\"int seed = 7;\"]\n";
    fs::write(global_dir.join(CONFIG_FILE_NAME), text).unwrap();

    let found = CinderConfig::find(project.path(), Some(home.path())).expect("global config");
    assert_eq!(found, global_dir.join(CONFIG_FILE_NAME));
    let cfg = CinderConfig::load_from(&found).unwrap();
    assert_eq!(cfg.repl.startup, vec!["int seed = 7;".to_string()]);
}

#[test]
fn malformed_config_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    fs::write(&path, "[session\n").unwrap();
    let err = CinderConfig::load_from(&path).unwrap_err();
    assert!(err.to_string().contains(CONFIG_FILE_NAME), "{err}");
}

#[test]
fn configured_session_uses_include_paths_relative_to_the_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("inc")).unwrap();
    fs::write(dir.path().join("inc").join("seven.h"), "int seven() { return 7; }\n").unwrap();
    let cfg: CinderConfig = toml::from_str("[session]\ninclude_paths = [\"inc\"]\n").unwrap();

    let session = Session::new(cfg.session_options(Some(dir.path()))).unwrap();
    session.evaluate("#include \"seven.h\"").unwrap();
    let result = session.evaluate("seven() * 6").unwrap();
    assert_eq!(result.value.map(|v| v.text), Some("(int) 42".to_string()));
}

// ─── check ───

#[test]
fn check_resolves_includes_from_the_search_path() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("half.h"), "int half(int v) { return v / 2; }\n").unwrap();
    let source = "#include \"half.h\"\nint quarter(int v) { return half(half(v)); }\n";

    let module =
        check_source("quarter.c", source, &[dir.path().to_path_buf()]).expect("should compile");
    assert!(module.function("quarter").is_some());
    assert!(module.function("half").is_some());
}

#[test]
fn check_fails_on_missing_includes() {
    let source = "#include \"nowhere.h\"\n";
    assert!(check_source("inc.c", source, &[PathBuf::from("/no/such/dir")]).is_err());
}

// ─── REPL input handling ───

#[test]
fn multi_line_input_accumulates_until_balanced() {
    let mut buffer = String::from("int add(int a, int b) {");
    assert!(needs_more_input(&buffer));
    buffer.push_str("\n  return a + b;");
    assert!(needs_more_input(&buffer));
    buffer.push_str("\n}");
    assert!(!needs_more_input(&buffer));
}

#[test]
fn meta_commands_take_the_rest_of_the_line() {
    assert_eq!(
        parse_command(".x /tmp/dir name/run.C(\"a b\")"),
        ParsedCommand::Command(ReplCommand::Execute("/tmp/dir name/run.C(\"a b\")"))
    );
    assert_eq!(
        parse_command(".I /opt/include"),
        ParsedCommand::Command(ReplCommand::Include(Some("/opt/include")))
    );
}
