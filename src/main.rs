//! Anvil command line
//!
//! Runs, checks, formats or tokenizes `.aml` / `.asl` files.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand, ValueEnum};

use anvil_engine::diagnostics::{LineIndex, RunReport};
use anvil_engine::engine::DEFAULT_MAX_DEPTH;
use anvil_engine::frontend::lexer::tokenize;
use anvil_engine::frontend::token::TokenKind;
use anvil_engine::writer::{format_program_with, Layout};
use anvil_engine::{Context, DiagnosticKind, Dialect, Engine, EngineConfig, Outcome, UnresolvedPolicy};

/// Anvil Engine
#[derive(Parser, Debug)]
#[command(name = "anvil")]
#[command(version)]
#[command(about = "Anvil Engine - run and check .aml sources")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input source file (.aml, .asl)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Evaluate even when names fail to resolve
    #[arg(long, global = true)]
    degraded: bool,

    /// Maximum nested function calls
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_DEPTH, global = true)]
    max_depth: usize,

    /// Dialect for sources without a shebang (aml, asl)
    #[arg(long, global = true)]
    dialect: Option<Dialect>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a source file
    Run {
        /// Input source file
        input: PathBuf,
    },
    /// Check a source file for errors without running it
    Check {
        /// Input source file
        input: PathBuf,
    },
    /// Print the canonical form of a source file
    Fmt {
        /// Input source file
        input: PathBuf,

        /// Print everything on one line
        #[arg(long)]
        compact: bool,
    },
    /// Dump the token stream
    Tokens {
        /// Input source file
        input: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    match execute(&cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            process::exit(1);
        }
    }
}

fn execute(cli: &Cli) -> anyhow::Result<i32> {
    let engine = Engine::new(EngineConfig {
        unresolved: if cli.degraded {
            UnresolvedPolicy::Degrade
        } else {
            UnresolvedPolicy::Reject
        },
        max_call_depth: cli.max_depth,
        dialect: cli.dialect,
        ..EngineConfig::default()
    });

    match &cli.command {
        Some(Commands::Run { input }) => run_file(&engine, input, cli.format),
        Some(Commands::Check { input }) => check_file(&engine, input, cli.format),
        Some(Commands::Fmt { input, compact }) => format_file(&engine, input, *compact),
        Some(Commands::Tokens { input }) => dump_tokens(&engine, input),
        None => match &cli.input {
            Some(input) => run_file(&engine, input, cli.format),
            None => bail!("no input file given (see --help)"),
        },
    }
}

fn load(engine: &Engine, path: &Path) -> anyhow::Result<(String, Dialect)> {
    engine
        .load(path)
        .with_context(|| format!("cannot load {}", path.display()))
}

fn run_file(engine: &Engine, path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let (source, dialect) = load(engine, path)?;
    let mut ctx = Context::new();
    let outcome = engine.run_source_as(&source, dialect, &mut ctx);
    report(path, &source, &outcome, format);
    Ok(outcome.exit_code())
}

fn check_file(engine: &Engine, path: &Path, format: OutputFormat) -> anyhow::Result<i32> {
    let (source, dialect) = load(engine, path)?;
    let (_, diagnostics) = engine.analyze(&source, dialect, &Context::new());
    let outcome = Outcome {
        diagnostics,
        value: None,
        fault: None,
        evaluated: false,
    };
    report(path, &source, &outcome, format);
    Ok(outcome.exit_code())
}

/// Formatting needs a program free of syntax errors
fn format_file(engine: &Engine, path: &Path, compact: bool) -> anyhow::Result<i32> {
    let (source, dialect) = load(engine, path)?;
    let (program, diagnostics) = engine.analyze(&source, dialect, &Context::new());
    let index = LineIndex::new(&source);
    let syntax_errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.is_error() && matches!(d.kind, DiagnosticKind::Lex | DiagnosticKind::Syntax))
        .collect();
    if !syntax_errors.is_empty() {
        for diag in syntax_errors {
            eprintln!("{}", diag.render(&index));
        }
        return Ok(1);
    }
    let layout = if compact { Layout::Compact } else { Layout::Pretty };
    print!("{}", format_program_with(&program, layout));
    Ok(0)
}

fn dump_tokens(engine: &Engine, path: &Path) -> anyhow::Result<i32> {
    let (source, _) = load(engine, path)?;
    let mut errors = 0;
    for token in tokenize(&source) {
        if matches!(token.kind, TokenKind::Error(_)) {
            errors += 1;
        }
        println!("{}:{}\t{:?}\t{:?}", token.line, token.column, token.kind, token.lexeme);
    }
    Ok(if errors > 0 { 1 } else { 0 })
}

fn report(path: &Path, source: &str, outcome: &Outcome, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let report = RunReport::new(&path.display().to_string(), source, outcome);
            println!("{}", report.to_json());
        }
        OutputFormat::Text => {
            let index = LineIndex::new(source);
            for diag in &outcome.diagnostics {
                eprintln!("{}", diag.render(&index));
            }
            if let Some(fault) = &outcome.fault {
                let (line, column) = index.line_col(fault.span.start);
                eprintln!("{}:{}: fault: {}", line, column, fault);
            }
        }
    }
}
