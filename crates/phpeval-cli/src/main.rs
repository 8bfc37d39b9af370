//! phpeval CLI - run, compile and analyze phpeval programs
//!
//! Programs are read as JSON-encoded ASTs.
//!
//! Commands:
//! - run: execute the main body with the interpreter or the compiler
//! - compile: print the stack code listing of functions
//! - analyze: print storage decisions and undefined-variable issues

mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use config::Config;
use output::{FunctionReport, OutputFormat, RunReport};
use phpeval_analyze::{logging, FunctionBody};
use phpeval_core::ast::MAIN_FUNCTION;
use phpeval_core::{Env, Program};
use phpeval_engine::{Engine, Strategy};

#[derive(Parser)]
#[command(name = "phpeval")]
#[command(version = "0.1.0")]
#[command(about = "Analyze, interpret and compile PHP-semantics programs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output format: text, json (default from config, else text)
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<String>,

    /// Path to config file (default: auto-detect .phpeval.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Ignore config files
    #[arg(long, global = true)]
    no_config: bool,

    /// Write a debug log of analysis and compilation to PATH
    #[arg(long, value_name = "PATH", global = true)]
    debug_log: Option<PathBuf>,

    /// Show verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a program
    Run {
        /// Program file (JSON AST)
        program: PathBuf,

        /// Execution strategy: interpret, compile
        #[arg(long, short = 's', value_name = "STRATEGY")]
        strategy: Option<String>,

        /// Maximum number of calls before the run is stopped
        #[arg(long, value_name = "CALLS")]
        budget: Option<u64>,
    },
    /// Print compiled listings
    Compile {
        /// Program file (JSON AST)
        program: PathBuf,

        /// Only list this function ({main} for the main body)
        #[arg(long, short = 'f', value_name = "NAME")]
        function: Option<String>,
    },
    /// Report storage decisions and undefined variables
    Analyze {
        /// Program file (JSON AST)
        program: PathBuf,
    },
}

fn main() -> ExitCode {
    let result = run();
    logging::shutdown();
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.debug_log.is_some() {
        match logging::init_logger(cli.debug_log.as_deref()) {
            Ok(path) => {
                if cli.verbose {
                    eprintln!("{}: {}", "Debug log".bold(), path.display());
                }
            }
            Err(e) => eprintln!("{}: Failed to open debug log: {}", "Warning".yellow(), e),
        }
    }

    let config = load_config(&cli)?;

    let format_name = cli
        .format
        .as_deref()
        .or(config.output.format.as_deref())
        .unwrap_or("text");
    let format = OutputFormat::from_str(format_name).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid output format '{}'. Valid options: text, json",
            format_name
        )
    })?;

    match &cli.command {
        Command::Run {
            program,
            strategy,
            budget,
        } => {
            let strategy = match strategy {
                Some(name) => parse_strategy(name)?,
                None => config.run.strategy,
            };
            let budget = budget.or(config.run.budget);
            run_program(&config, program, strategy, budget, format, cli.verbose)
        }
        Command::Compile { program, function } => {
            compile_program(&config, program, function.as_deref(), format)
        }
        Command::Analyze { program } => analyze_program(&config, program, format),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    if cli.no_config {
        return Ok(Config::default());
    }
    let found = match &cli.config {
        Some(path) => Some((Config::load_path(path)?, path.clone())),
        None => Config::load()?,
    };
    Ok(match found {
        Some((config, path)) => {
            logging::log_config_load(&path);
            if cli.verbose {
                eprintln!("{}: {}", "Using config".bold(), path.display());
            }
            config
        }
        None => Config::default(),
    })
}

fn parse_strategy(name: &str) -> Result<Strategy> {
    match name.to_lowercase().as_str() {
        "interpret" => Ok(Strategy::Interpret),
        "compile" => Ok(Strategy::Compile),
        _ => anyhow::bail!(
            "Invalid strategy '{}'. Valid options: interpret, compile",
            name
        ),
    }
}

fn load_program(path: &Path) -> Result<Program> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Program::from_json(&source).with_context(|| format!("Failed to parse {}", path.display()))
}

fn run_program(
    config: &Config,
    path: &Path,
    strategy: Strategy,
    budget: Option<u64>,
    format: OutputFormat,
    verbose: bool,
) -> Result<ExitCode> {
    let program = load_program(path)?;
    if verbose && format == OutputFormat::Text {
        eprintln!("{}: {}", "Strategy".bold(), strategy);
    }

    let engine = Engine::with_config(program, strategy, &config.analyze);
    let mut env = Env::new();
    if let Some(calls) = budget {
        env = env.with_budget(calls);
    }

    let result = engine.run(&mut env);
    let report = RunReport::new(strategy.to_string(), env.output(), env.diagnostics());
    let (report, code) = match result {
        Ok(value) => (report.with_result(&value), ExitCode::SUCCESS),
        Err(e) => (report.with_error(e.to_string()), ExitCode::from(1)),
    };
    output::print_run(format, &report);
    Ok(code)
}

fn compile_program(
    config: &Config,
    path: &Path,
    function: Option<&str>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let program = load_program(path)?;
    let names: Vec<String> = match function {
        Some(name) => vec![name.to_string()],
        None => program
            .functions
            .iter()
            .map(|def| def.name.clone())
            .chain(std::iter::once(MAIN_FUNCTION.to_string()))
            .collect(),
    };

    let engine = Engine::with_config(program, Strategy::Compile, &config.analyze);
    let mut listings = Vec::with_capacity(names.len());
    for name in names {
        let listing = engine
            .listing(&name)
            .with_context(|| format!("Failed to compile {}", name))?;
        listings.push((name, listing));
    }
    output::print_listings(format, &listings);
    Ok(ExitCode::SUCCESS)
}

fn analyze_program(config: &Config, path: &Path, format: OutputFormat) -> Result<ExitCode> {
    let program = load_program(path)?;
    let engine = Engine::with_config(program.clone(), Strategy::Interpret, &config.analyze);
    let analysis = engine.analysis();

    let mut functions = Vec::new();
    for info in analysis.all() {
        let body = if info.is_main {
            FunctionBody::main(&program)
        } else {
            let def = program
                .function(&info.name)
                .with_context(|| format!("No definition for analyzed function {}", info.name))?;
            FunctionBody::of(def)
        };
        functions.push(FunctionReport::new(info, body));
    }
    let issues = analysis.issues();
    output::print_analysis(format, &functions, &issues);

    Ok(if issues.error_count() > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strategy() {
        assert_eq!(parse_strategy("Compile").unwrap(), Strategy::Compile);
        assert_eq!(parse_strategy("interpret").unwrap(), Strategy::Interpret);
        assert!(parse_strategy("jit").is_err());
    }

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "phpeval",
            "run",
            "prog.json",
            "--strategy",
            "compile",
            "--budget",
            "10",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format.as_deref(), Some("json"));
        match cli.command {
            Command::Run {
                program,
                strategy,
                budget,
            } => {
                assert_eq!(program, PathBuf::from("prog.json"));
                assert_eq!(strategy.as_deref(), Some("compile"));
                assert_eq!(budget, Some(10));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_load_program_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_program(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));
    }
}
