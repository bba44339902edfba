//! Quill CLI

use clap::{Parser, Subcommand};
use quill::ast::{FileId, SourceMap};
use quill::error::report_error;
use quill::session::{RunResult, Session, SessionConfig};
use quill::stdio::{self, StdioModule};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quill", version, about = "Quill - embeddable scripting language")]
struct Cli {
    /// Additional directory searched by import and include
    #[arg(short = 'I', long = "include-dir", global = true)]
    include_dirs: Vec<PathBuf>,

    /// Maximum nesting of function calls
    #[arg(long, global = true)]
    max_depth: Option<usize>,

    /// Maximum number of elements in one array
    #[arg(long, global = true)]
    max_array_len: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a Quill source file
    Run {
        /// Source file to run
        file: PathBuf,
    },
    /// Check a source file without running it
    Check {
        /// Source file to check
        file: PathBuf,
    },
    /// Parse and dump AST as JSON (debug)
    Parse {
        /// Source file to parse
        file: PathBuf,
    },
    /// Tokenize and dump tokens (debug)
    Tokens {
        /// Source file to tokenize
        file: PathBuf,
    },
    /// Start an interactive session
    Repl,
}

impl Cli {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::from_env();
        for dir in &self.include_dirs {
            config = config.with_search_dir(dir);
        }
        if let Some(depth) = self.max_depth {
            config = config.with_max_call_depth(depth);
        }
        if let Some(len) = self.max_array_len {
            config = config.with_max_array_len(len);
        }
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let result = match &cli.command {
        Command::Run { file } => run_file(config, file),
        Command::Check { file } => check_file(config, file),
        Command::Parse { file } => parse_file(file),
        Command::Tokens { file } => tokenize_file(file),
        Command::Repl => start_repl(config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn new_session(config: SessionConfig) -> Session {
    let mut session = Session::new(config);
    stdio::install(&mut session, StdioModule::stdout());
    session
}

fn report(session: &Session, result: &RunResult) -> ExitCode {
    if result.is_success() {
        return ExitCode::SUCCESS;
    }
    let mut stderr = std::io::stderr().lock();
    for error in &result.errors {
        if report_error(session.sources(), error, &mut stderr).is_err() {
            eprintln!("{}", error.render(session.sources()));
        }
    }
    ExitCode::FAILURE
}

fn run_file(config: SessionConfig, path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut session = new_session(config);
    let result = session.run_file(path);
    Ok(report(&session, &result))
}

fn check_file(config: SessionConfig, path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let mut session = new_session(config);
    let result = session.check(&source);
    if result.is_success() {
        println!("✓ {} checks successfully", path.display());
    }
    Ok(report(&session, &result))
}

fn parse_file(path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let mut sources = SourceMap::new();
    let file = sources.add(path.display().to_string(), source.as_str());

    match quill::parser::parse_source(&source, file) {
        Ok(program) => {
            println!("{}", serde_json::to_string_pretty(&program)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            report_error(&sources, &error, &mut std::io::stderr().lock())?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn tokenize_file(path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let tokens = quill::lexer::tokenize(&source, FileId(0))?;

    for (tok, span) in &tokens {
        println!("{:?} @ {}..{}", tok, span.start, span.end);
    }

    Ok(ExitCode::SUCCESS)
}

fn start_repl(config: SessionConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut repl = quill::repl::Repl::new(new_session(config))?;
    repl.run()?;
    Ok(ExitCode::SUCCESS)
}
