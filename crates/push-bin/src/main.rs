//! pushgate - command-line client for the legacy binary push gateway.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use push_config_and_utils::{init_logging, ClientConfig, Environment, Paths};

/// pushgate command-line interface.
#[derive(Parser)]
#[command(name = "pushgate")]
#[command(about = "Send notifications through the legacy binary push gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file. Defaults to <base-dir>/config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base directory for config and logs. Defaults to ~/.pushgate
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Gateway environment (production, sandbox)
    #[arg(short, long, global = true, env = "PUSHGATE_ENVIRONMENT")]
    environment: Option<Environment>,

    /// Also write JSON logs to <base-dir>/logs/pushgate.jsonl
    #[arg(long, global = true)]
    json_log: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message from a single process
    Push(commands::push::PushArgs),
    /// Read the feedback service and print every tuple
    Feedback,
    /// Read messages as JSON lines from stdin and fan them out to workers
    Serve(commands::serve::ServeArgs),
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = ClientConfig::load_from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.load_from_env()?;
            config
        }
        None => ClientConfig::load(&paths)?,
    };
    if let Some(environment) = cli.environment {
        config.environment = environment;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let json_log = cli.json_log.then(|| paths.log_file());
    init_logging(&config.log_level, json_log.as_deref())?;

    match cli.command {
        Commands::Push(args) => commands::push::run(config, args),
        Commands::Feedback => commands::feedback::run(config),
        Commands::Serve(args) => commands::serve::run(config, args),
    }
}
