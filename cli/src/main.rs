mod commands;
mod config;
mod context;
mod output;
mod telemetry;

use clap::Parser;
use shark_core::error::SharkError;
use std::time::Duration;

use commands::Command;
use config::Config;
use context::AppContext;

/// Local work planning for agent-driven development: epics, features, and
/// tasks under a configurable workflow, with JSON output for automation.
#[derive(Parser)]
#[command(name = "shark")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local work planning for agent-driven development")]
struct Cli {
    /// Emit a machine-readable JSON envelope on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Store URL override (e.g. sqlite://.shark/shark.sqlite)
    #[arg(long, global = true, env = "SHARK_DATABASE_URL")]
    db: Option<String>,

    /// Log level override
    #[arg(long, global = true, env = "SHARK_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let mut config = match Config::load().and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {error:#}");
            return 2;
        }
    };
    if let Some(db) = &cli.db {
        config.database.url = Some(db.clone());
    }
    if let Err(error) = telemetry::init_telemetry(&config.logging, cli.log_level.as_deref()) {
        eprintln!("error: {error:#}");
        return 2;
    }

    let deadline = Duration::from_secs(config.command.deadline_secs);
    let result = async {
        let ctx = AppContext::initialize(&config.database_url()).await?;
        commands::dispatch(&ctx, cli.command).await
    };

    let result = match tokio::time::timeout(deadline, result).await {
        Ok(result) => result,
        Err(_elapsed) => Err(SharkError::Timeout(config.command.deadline_secs)),
    };

    match result {
        Ok(command_output) => {
            output::emit(cli.json, &command_output);
            0
        }
        Err(error) => {
            tracing::debug!(%error, "command failed");
            output::emit_error(cli.json, &error);
            error.exit_code()
        }
    }
}
