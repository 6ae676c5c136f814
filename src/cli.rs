use crate::config::Config;
use crate::error::VmError;
use crate::types::Code;
use crate::vm::Vm;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "framevm")]
#[command(about = "framevm - A frame-switching bytecode runtime", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Instructions per thread slice (0 = switch only on yield_thread)
    #[arg(long, global = true)]
    pub quantum: Option<u32>,

    /// Collect garbage before every allocation
    #[arg(long, global = true)]
    pub gc_stress: bool,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program as the main thread
    Run {
        /// JSON-serialized code object
        program: PathBuf,
    },

    /// Print a program's instructions
    Disasm {
        /// JSON-serialized code object
        program: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments
///
/// Returns the process exit status.
pub fn run_cli() -> Result<i32> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

/// Run the CLI with provided arguments
pub fn run_cli_from_args(args: Vec<String>) -> Result<i32> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<i32> {
    init_logging(cli.verbose);

    // Eagerly load and validate configuration before executing any command
    let config = Config::builder()
        .config_path(cli.config.clone())
        .quantum(cli.quantum)
        .gc_stress(cli.gc_stress.then_some(true))
        .build()?;

    match cli.command {
        Commands::Run { program } => {
            let code = load_program(&program)?;
            let mut vm = Vm::new(config).context("Failed to start VM")?;
            match vm.run_main(code) {
                Ok(()) => Ok(0),
                Err(VmError::Exit(status)) => Ok(status),
                Err(VmError::Exception(exc)) => {
                    eprintln!("Uncaught exception: {}", exc);
                    Ok(1)
                }
                Err(err) => Err(err.into()),
            }
        }

        Commands::Disasm { program } => {
            let code = load_program(&program)?;
            print!("{}", code.disassemble());
            Ok(0)
        }

        Commands::Config => {
            let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", text);
            Ok(0)
        }
    }
}

fn load_program(path: &Path) -> Result<Rc<Code>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read program {}", path.display()))?;
    Code::from_json(&text).with_context(|| format!("Invalid program {}", path.display()))
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // Program output owns stdout; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("framevm")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    fn demo(name: &str) -> String {
        format!("{}/demos/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    #[test]
    fn test_run_demo_succeeds() {
        let status = run_cli_from_args(args(&["run", &demo("countdown.json")])).unwrap();
        assert_eq!(status, 0);
    }

    #[test]
    fn test_disasm_demo() {
        let status = run_cli_from_args(args(&["--quantum", "5", "disasm", &demo("threads.json")]))
            .unwrap();
        assert_eq!(status, 0);
    }

    #[test]
    fn test_exit_status_and_uncaught_exception() {
        let dir = std::env::temp_dir();
        let exits = dir.join(format!("framevm-exit-{}.json", std::process::id()));
        let raises = dir.join(format!("framevm-raise-{}.json", std::process::id()));
        fs::write(
            &exits,
            r#"{"name": "main", "names": ["exit"], "consts": [{"t": "Int", "v": 3}],
                "instrs": [{"op": "LoadName", "arg": 0}, {"op": "LoadConst", "arg": 0},
                           {"op": "CallFunction", "arg": 1}]}"#,
        )
        .unwrap();
        fs::write(
            &raises,
            r#"{"name": "main", "names": ["nope"], "instrs": [{"op": "LoadName", "arg": 0}]}"#,
        )
        .unwrap();

        let exit_status = run_cli_from_args(args(&["run", exits.to_str().unwrap()])).unwrap();
        let raise_status = run_cli_from_args(args(&["run", raises.to_str().unwrap()])).unwrap();
        fs::remove_file(&exits).unwrap();
        fs::remove_file(&raises).unwrap();

        assert_eq!(exit_status, 3);
        assert_eq!(raise_status, 1);
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let err = run_cli_from_args(args(&["run", "/nonexistent/program.json"])).unwrap_err();
        assert!(err.to_string().contains("Failed to read program"));
    }
}
