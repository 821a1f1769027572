//! Cinder CLI: an incremental C interpreter.

use std::path::{Path, PathBuf};

use cinder_cli::check::{check_source, emit_json};
use cinder_cli::colors::{self, bold, gray, green, red, status_label, yellow};
use cinder_cli::config::CinderConfig;
use cinder_cli::repl::{self, print_error};
use cinder_vm::{Session, SessionOptions};
use clap::{ArgAction, Parser as ClapParser, Subcommand};

#[derive(ClapParser)]
#[command(name = "cinder", version, about = "An incremental C interpreter")]
struct Cli {
    /// Add a directory to the include search path
    #[arg(short = 'I', value_name = "DIR", global = true)]
    include: Vec<PathBuf>,

    /// Report unknown identifiers as errors instead of resolving them at run time
    #[arg(long, global = true)]
    no_dynamic: bool,

    /// More log output (-v info, -vv debug, -vvv trace); CINDER_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive prompt (the default)
    Repl,
    /// Evaluate inputs in order in one session and print the results
    Eval {
        /// Interactive inputs, e.g. 'int x = 2;' 'x * 21'
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Print each result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load a source file; `file.C(args)` also calls the function named after the file
    Run {
        /// Path, optionally followed by a call argument list
        #[arg()]
        file: String,
    },
    /// Compile a file without running it
    Check {
        /// Path to the C source file
        #[arg()]
        file: PathBuf,

        /// Print the compiled bytecode as JSON
        #[arg(long)]
        emit: bool,

        /// Write the emitted bytecode here instead of stdout
        #[arg(short, long, requires = "emit")]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (config, config_dir) = load_config();
    let mut options = config.session_options(config_dir.as_deref());
    options.include_paths.extend(cli.include.iter().cloned());
    if cli.no_dynamic {
        options.compilation.dynamic_scoping = false;
    }

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Repl => repl::run_repl(start_session(options), &config),
        Commands::Eval { inputs, json } => cmd_eval(start_session(options), &inputs, json),
        Commands::Run { file } => cmd_run(start_session(options), &file),
        Commands::Check { file, emit, output } => {
            cmd_check(&file, &options.include_paths, emit, output.as_deref())
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("CINDER_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// The nearest `cinder.toml` and the directory it lives in.
fn load_config() -> (CinderConfig, Option<PathBuf>) {
    match CinderConfig::load_with_path() {
        Ok(Some((path, config))) => (config, path.parent().map(Path::to_path_buf)),
        Ok(None) => (CinderConfig::default(), None),
        Err(e) => {
            eprintln!("{} ignoring configuration: {}", yellow("warning:"), e);
            (CinderConfig::default(), None)
        }
    }
}

fn start_session(options: SessionOptions) -> Session {
    Session::new(options).unwrap_or_else(|e| {
        eprintln!("{} cannot start interpreter session", red("error:"));
        print_error(&e);
        std::process::exit(1);
    })
}

fn cmd_eval(session: Session, inputs: &[String], json: bool) {
    for input in inputs {
        match session.evaluate(input) {
            Ok(result) if json => match serde_json::to_string(&result) {
                Ok(line) => println!("{}", line),
                Err(e) => {
                    eprintln!("{} {}", red("error:"), e);
                    std::process::exit(1);
                }
            },
            Ok(result) => print!("{}", result.output),
            Err(e) => {
                print_error(&e);
                std::process::exit(1);
            }
        }
    }
}

fn cmd_run(session: Session, file: &str) {
    session.set_echo(true);
    let result = if file.trim_end().ends_with(')') {
        session.execute_file(file)
    } else {
        session.load_file(file)
    };
    if let Err(e) = result {
        print_error(&e);
        std::process::exit(1);
    }
}

fn cmd_check(file: &Path, include_paths: &[PathBuf], emit: bool, output: Option<&Path>) {
    let source = std::fs::read_to_string(file).unwrap_or_else(|e| {
        let name = file.display().to_string();
        eprintln!("{} cannot read file '{}': {}", red("error:"), bold(&name), e);
        std::process::exit(1);
    });
    let filename = file.display().to_string();

    let module = match check_source(&filename, &source, include_paths) {
        Ok(module) => module,
        Err(diagnostics) => {
            for diagnostic in &diagnostics {
                eprint!("{}", colors::diagnostic(diagnostic));
            }
            std::process::exit(1);
        }
    };

    if !emit {
        println!("{} {} {}", green("ok"), bold(&filename), gray("no errors found"));
        return;
    }

    let json = emit_json(&module).unwrap_or_else(|e| {
        eprintln!("{} cannot serialize bytecode: {}", red("error:"), e);
        std::process::exit(1);
    });
    match output {
        Some(path) => {
            println!("{} bytecode to {}", status_label("Emitting"), path.display());
            std::fs::write(path, &json).unwrap_or_else(|e| {
                eprintln!("{} writing to '{}': {}", red("error:"), path.display(), e);
                std::process::exit(1);
            });
        }
        None => println!("{}", json),
    }
}
