#![forbid(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use redraft_commands::InMemoryBackend;
use redraft_core::EngineConfig;

use crate::error::{CliError, Result};
use crate::logging;
use crate::script::{Script, Session, SessionReport};

#[derive(Debug, Parser)]
#[command(
    name = "redraft",
    about = "Run scripted CAD editing sessions against the redraft undo/redo engine",
    version
)]
pub struct Cli {
    /// Log filter, e.g. `debug` or `redraft.executor=info`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Engine configuration file (TOML, or JSON by extension).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Draw two shapes, undo both and redo one.
    Demo(SessionArgs),

    /// Run a JSON or TOML script of execute/undo/redo/clear steps.
    Run(RunArgs),

    /// Print the effective engine configuration.
    #[command(name = "show-config")]
    ShowConfig,
}

#[derive(Debug, Clone, Default, Args)]
pub struct SessionArgs {
    /// Simulated backend latency per call, in milliseconds.
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Print the report on a single line.
    #[arg(long)]
    pub compact: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Script file.
    #[arg(long, short)]
    pub script: PathBuf,

    /// Continue after a failed step.
    #[arg(long)]
    pub keep_going: bool,

    #[command(flatten)]
    pub session: SessionArgs,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref())?;
    run(cli, &mut std::io::stdout().lock())
}

pub fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Demo(args) => run_session(config, Script::demo(), &args, out),
        Commands::Run(args) => {
            let mut script = Script::from_file(&args.script)?;
            script.keep_going |= args.keep_going;
            run_session(config, script, &args.session, out)
        }
        Commands::ShowConfig => {
            let text = toml::to_string_pretty(&config)
                .map_err(|err| CliError::invalid(err.to_string()))?;
            write!(out, "{text}")?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    Ok(config.validated()?)
}

fn run_session(
    config: EngineConfig,
    script: Script,
    args: &SessionArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let mut backend = InMemoryBackend::new();
    if let Some(ms) = args.latency_ms {
        backend = backend.with_latency(Duration::from_millis(ms));
    }
    let keep_going = script.keep_going;
    let session = Session::new(config, backend)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(session.run(script));
    write_report(&report, args.compact, out)?;

    match report.first_failure() {
        Some(step) if !keep_going => Err(CliError::StepFailed {
            index: step.index,
            action: step.action.clone(),
            message: step.error.clone().unwrap_or_default(),
        }),
        _ => Ok(()),
    }
}

fn write_report(report: &SessionReport, compact: bool, out: &mut dyn Write) -> Result<()> {
    let text = if compact {
        serde_json::to_string(report)?
    } else {
        serde_json::to_string_pretty(report)?
    };
    writeln!(out, "{text}")?;
    Ok(())
}
