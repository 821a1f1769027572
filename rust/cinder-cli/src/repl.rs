//! Interactive shell on top of an interpreter [`Session`].
//!
//! Lines starting with `.` followed by a letter are meta-commands; all other
//! input is C. Input that the validator reports as incomplete keeps the
//! prompt open until brackets and literals balance.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use cinder_compiler::compiler::validator::{InputValidator, ValidationResult};
use cinder_vm::{CinderError, DumpRange, EvalResult, Session};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

use crate::colors::{self, bold, cyan, gray, green, red, yellow};
use crate::config::{CinderConfig, REPL_HISTORY_PATH_ENV};

const KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "char", "class", "const", "continue", "do", "double", "else", "enum",
    "false", "float", "for", "if", "int", "long", "return", "short", "signed", "sizeof", "struct",
    "true", "typedef", "unsigned", "void", "while",
];

const BUILTINS: &[&str] = &[
    "printf", "puts", "putchar", "abs", "labs", "fabs", "sqrt", "pow", "floor", "ceil", "strlen",
];

const COMMANDS: &[&str] = &[".q", ".help", ".L", ".x", ".I", ".dump", ".dynamic", ".printAST"];

// ── Meta-commands ───────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub enum ReplCommand<'a> {
    Quit,
    Help,
    /// `.L file`: load a source file.
    Load(&'a str),
    /// `.x file.C(args)`: load a file and call its function.
    Execute(&'a str),
    /// `.I [dir]`: add an include path, or list them.
    Include(Option<&'a str>),
    Dump(DumpRange),
    /// `.dynamic [on|off]`: set or show runtime name resolution.
    Dynamic(Option<bool>),
    /// `.printAST [on|off]`: echo the declarations each input commits.
    PrintAst(Option<bool>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParsedCommand<'a> {
    NotACommand,
    UnknownCommand(&'a str),
    InvalidUsage(&'static str),
    Command(ReplCommand<'a>),
}

fn parse_switch(arg: Option<&str>) -> Result<Option<bool>, ()> {
    match arg {
        None => Ok(None),
        Some("on" | "1" | "true") => Ok(Some(true)),
        Some("off" | "0" | "false") => Ok(Some(false)),
        Some(_) => Err(()),
    }
}

pub fn parse_command(line: &str) -> ParsedCommand<'_> {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('.') else {
        return ParsedCommand::NotACommand;
    };
    // `.5 + 1` is C.
    if !rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return ParsedCommand::NotACommand;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let arg = parts.next().map(str::trim).filter(|v| !v.is_empty());

    match cmd {
        ".q" | ".quit" => ParsedCommand::Command(ReplCommand::Quit),
        ".help" | ".h" | ".?" => ParsedCommand::Command(ReplCommand::Help),
        ".L" => match arg {
            Some(path) => ParsedCommand::Command(ReplCommand::Load(path)),
            None => ParsedCommand::InvalidUsage("Usage: .L <file>"),
        },
        ".x" | ".X" => match arg {
            Some(spec) => ParsedCommand::Command(ReplCommand::Execute(spec)),
            None => ParsedCommand::InvalidUsage("Usage: .x <file>[(args)]"),
        },
        ".I" => ParsedCommand::Command(ReplCommand::Include(arg)),
        ".dump" => match arg {
            None | Some("new") => {
                ParsedCommand::Command(ReplCommand::Dump(DumpRange::SincePreviousDump))
            }
            Some("all") => ParsedCommand::Command(ReplCommand::Dump(DumpRange::All)),
            Some(n) => match n.parse::<usize>() {
                Ok(n) => ParsedCommand::Command(ReplCommand::Dump(DumpRange::Last(n))),
                Err(_) => ParsedCommand::InvalidUsage("Usage: .dump [all|new|<count>]"),
            },
        },
        ".dynamic" => match parse_switch(arg) {
            Ok(v) => ParsedCommand::Command(ReplCommand::Dynamic(v)),
            Err(()) => ParsedCommand::InvalidUsage("Usage: .dynamic [on|off]"),
        },
        ".printAST" => match parse_switch(arg) {
            Ok(v) => ParsedCommand::Command(ReplCommand::PrintAst(v)),
            Err(()) => ParsedCommand::InvalidUsage("Usage: .printAST [on|off]"),
        },
        other => ParsedCommand::UnknownCommand(other),
    }
}

/// True while `input` has unbalanced brackets and should keep the prompt open.
pub fn needs_more_input(input: &str) -> bool {
    InputValidator::new().validate(input) == ValidationResult::Incomplete
}

// ── Line editor helper ──────────────────────────────────────────────

#[derive(Default)]
struct CinderHelper {
    /// Names declared in the session so far.
    names: RefCell<Vec<String>>,
}

impl CinderHelper {
    fn refresh(&self, session: &Session) {
        let mut names: Vec<String> = session.decls_from(0).into_iter().map(|d| d.name).collect();
        names.sort();
        names.dedup();
        *self.names.borrow_mut() = names;
    }
}

impl Completer for CinderHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = line[..pos]
            .rfind(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .map(|i| i + 1)
            .unwrap_or(0);
        let word = &line[start..pos];
        if word.is_empty() {
            return Ok((start, Vec::new()));
        }

        let pair = |s: &str| Pair { display: s.to_string(), replacement: s.to_string() };
        let candidates = if start == 0 && word.starts_with('.') {
            COMMANDS.iter().filter(|c| c.starts_with(word)).map(|c| pair(c)).collect()
        } else {
            let names = self.names.borrow();
            KEYWORDS
                .iter()
                .chain(BUILTINS)
                .copied()
                .chain(names.iter().map(String::as_str))
                .filter(|c| c.starts_with(word))
                .map(pair)
                .collect()
        };
        Ok((start, candidates))
    }
}

impl Hinter for CinderHelper {
    type Hint = String;
}

impl Highlighter for CinderHelper {}

impl Validator for CinderHelper {}

impl Helper for CinderHelper {}

// ── Loop ────────────────────────────────────────────────────────────

struct ReplState {
    print_ast: bool,
}

pub fn run_repl(session: Session, config: &CinderConfig) {
    println!("{}", bold(&cyan(&format!("cinder {}", env!("CARGO_PKG_VERSION")))));
    println!("{}\n", gray("Type C statements or declarations. .help for commands, .q to exit."));

    session.set_echo(true);
    let mut state = ReplState { print_ast: false };
    for input in &config.repl.startup {
        eval_input(input, &session, &state);
    }

    let editor_config = rustyline::Config::builder().auto_add_history(true).build();
    let mut rl: Editor<CinderHelper, DefaultHistory> = match Editor::with_config(editor_config) {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{} cannot start line editor: {}", red("error:"), e);
            return;
        }
    };
    let helper = CinderHelper::default();
    helper.refresh(&session);
    rl.set_helper(Some(helper));

    let history_path = history_path(config);
    if let Some(ref path) = history_path {
        if path.exists() {
            if let Err(err) = rl.load_history(path) {
                eprintln!(
                    "{} failed to load history from {}: {}",
                    yellow("warning:"),
                    path.display(),
                    err
                );
            }
        }
    }

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() {
            format!("{} ", green("[cinder]"))
        } else {
            format!("{} ", gray("      ..."))
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                if buffer.is_empty() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match handle_command(&line, &session, &mut state) {
                        Some(false) => break,
                        Some(true) => {
                            if let Some(helper) = rl.helper() {
                                helper.refresh(&session);
                            }
                            continue;
                        }
                        None => {}
                    }
                } else {
                    buffer.push('\n');
                }
                buffer.push_str(&line);

                if needs_more_input(&buffer) {
                    continue;
                }
                let input = std::mem::take(&mut buffer);
                eval_input(input.trim(), &session, &state);
                if let Some(helper) = rl.helper() {
                    helper.refresh(&session);
                }
            }
            Err(ReadlineError::Interrupted) => {
                if buffer.is_empty() {
                    println!("{}", gray("(.q or Ctrl-D to exit)"));
                } else {
                    buffer.clear();
                }
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{} {}", red("error:"), err);
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                eprintln!(
                    "{} failed to create history directory {}: {}",
                    yellow("warning:"),
                    parent.display(),
                    err
                );
            }
        }
        if let Err(err) = rl.save_history(path) {
            eprintln!(
                "{} failed to save history to {}: {}",
                yellow("warning:"),
                path.display(),
                err
            );
        }
    }
}

fn history_path(config: &CinderConfig) -> Option<PathBuf> {
    let override_path = std::env::var(REPL_HISTORY_PATH_ENV).ok();
    config.history_path(dirs::home_dir().as_deref(), override_path.as_deref())
}

/// Runs a meta-command. `Some(true)` to continue, `Some(false)` to quit,
/// `None` when the line is C input.
fn handle_command(line: &str, session: &Session, state: &mut ReplState) -> Option<bool> {
    let command = match parse_command(line) {
        ParsedCommand::NotACommand => return None,
        ParsedCommand::UnknownCommand(cmd) => {
            eprintln!("{} unknown command '{}'. Type .help for usage.", red("error:"), cmd);
            return Some(true);
        }
        ParsedCommand::InvalidUsage(usage) => {
            eprintln!("{} {}", red("error:"), usage);
            return Some(true);
        }
        ParsedCommand::Command(command) => command,
    };

    match command {
        ReplCommand::Quit => return Some(false),
        ReplCommand::Help => print_help(),
        ReplCommand::Load(path) => run_input(session, state, |s| s.load_file(path)),
        ReplCommand::Execute(spec) => run_input(session, state, |s| s.execute_file(spec)),
        ReplCommand::Include(Some(dir)) => session.add_include_path(dir),
        ReplCommand::Include(None) => {
            for path in session.options().include_paths {
                println!("  {}", path.display());
            }
        }
        ReplCommand::Dump(range) => print!("{}", session.dump_decls(range)),
        ReplCommand::Dynamic(Some(enabled)) => session.set_dynamic_lookup(enabled),
        ReplCommand::Dynamic(None) => {
            let status = if session.is_dynamic_lookup_enabled() { "on" } else { "off" };
            println!("{} {}", gray("dynamic lookup:"), status);
        }
        ReplCommand::PrintAst(value) => {
            state.print_ast = value.unwrap_or(!state.print_ast);
            println!("{} {}", gray("printAST:"), if state.print_ast { "on" } else { "off" });
        }
    }
    Some(true)
}

fn eval_input(input: &str, session: &Session, state: &ReplState) {
    run_input(session, state, |s| s.evaluate(input));
}

/// Runs one input and reports failures. Program output was already echoed.
fn run_input(
    session: &Session,
    state: &ReplState,
    f: impl FnOnce(&Session) -> Result<EvalResult, CinderError>,
) {
    let before = session.decl_count();
    if let Err(e) = f(session) {
        print_error(&e);
    }
    if state.print_ast {
        for decl in session.decls_from(before) {
            println!("{} {}", gray(&format!("[{}]", decl.category)), decl.text);
        }
    }
}

pub fn print_error(err: &CinderError) {
    if err.diagnostics().is_empty() {
        eprintln!("{} {}", red("error:"), err);
        return;
    }
    for diagnostic in err.diagnostics() {
        eprint!("{}", colors::diagnostic(diagnostic));
    }
}

fn print_help() {
    println!("{}", bold("Commands:"));
    println!("  {}  {}", cyan(".q"), gray("Exit"));
    println!("  {}  {}", cyan(".help"), gray("Show this help"));
    println!("  {}  {}", cyan(".L <file>"), gray("Load a source file"));
    println!(
        "  {}  {}",
        cyan(".x <file>(args)"),
        gray("Load a file and call the function named after it")
    );
    println!("  {}  {}", cyan(".I [dir]"), gray("Add an include path, or list them"));
    println!("  {}  {}", cyan(".dump [all|new|N]"), gray("Print committed declarations"));
    println!("  {}  {}", cyan(".dynamic [on|off]"), gray("Resolve unknown names at run time"));
    println!(
        "  {}  {}",
        cyan(".printAST [on|off]"),
        gray("Print the declarations each input adds")
    );
    println!();
    println!("{}", gray("An expression without a trailing ';' prints its value."));
    println!("{}", gray(&format!("History location can be set with ${}.", REPL_HISTORY_PATH_ENV)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(cmd: ReplCommand<'_>) -> ParsedCommand<'_> {
        ParsedCommand::Command(cmd)
    }

    #[test]
    fn parse_meta_commands() {
        assert_eq!(parse_command(".q"), command(ReplCommand::Quit));
        assert_eq!(parse_command("  .L  macro.C "), command(ReplCommand::Load("macro.C")));
        assert_eq!(parse_command(".x run.C(1, 2)"), command(ReplCommand::Execute("run.C(1, 2)")));
        assert_eq!(parse_command(".I"), command(ReplCommand::Include(None)));
        assert_eq!(parse_command(".dynamic off"), command(ReplCommand::Dynamic(Some(false))));
        assert_eq!(parse_command(".printAST"), command(ReplCommand::PrintAst(None)));
        assert_eq!(parse_command(".L"), ParsedCommand::InvalidUsage("Usage: .L <file>"));
        assert_eq!(
            parse_command(".dynamic maybe"),
            ParsedCommand::InvalidUsage("Usage: .dynamic [on|off]")
        );
        assert_eq!(parse_command(".frobnicate"), ParsedCommand::UnknownCommand(".frobnicate"));
    }

    #[test]
    fn dump_ranges() {
        assert_eq!(
            parse_command(".dump"),
            command(ReplCommand::Dump(DumpRange::SincePreviousDump))
        );
        assert_eq!(parse_command(".dump all"), command(ReplCommand::Dump(DumpRange::All)));
        assert_eq!(parse_command(".dump 3"), command(ReplCommand::Dump(DumpRange::Last(3))));
        assert!(matches!(parse_command(".dump x"), ParsedCommand::InvalidUsage(_)));
    }

    #[test]
    fn c_input_is_not_a_command() {
        assert_eq!(parse_command("int x = 1;"), ParsedCommand::NotACommand);
        assert_eq!(parse_command(".5 + 1"), ParsedCommand::NotACommand);
    }

    #[test]
    fn open_brackets_continue_the_prompt() {
        assert!(needs_more_input("int f() {"));
        assert!(needs_more_input("sq(2,"));
        assert!(!needs_more_input("int f() { return 1; }"));
        assert!(!needs_more_input("1 + 1"));
        assert!(!needs_more_input("int x = 1; }"));
    }
}
