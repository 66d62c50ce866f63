//! Witness CLI: verification front-end for recorded runs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;

use witness_store::Auditor;

/// Witness - tamper-evident audit log for agent runtime events
#[derive(Parser)]
#[command(name = "witness")]
#[command(about = "Tamper-evident audit log for agent runtime events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the integrity of a recorded run
    Audit {
        /// Run identifier under the runs directory
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Audit { run_id } => handle_audit(run_id, cli.json).await,
    };

    if let Err(e) = result {
        error!("command failed: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_audit(run_id: &str, json: bool) -> Result<()> {
    let db_path = runs_root()?.join(run_id).join("logs.db");
    if !db_path.exists() {
        if json {
            println!(
                "{}",
                serde_json::json!({"valid": false, "error": format!("run {run_id} not found")})
            );
        } else {
            eprintln!("TAMPERED — run {run_id} not found at {}", db_path.display());
        }
        std::process::exit(1);
    }

    let auditor = Auditor::open(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let result = auditor
        .run()
        .await
        .context("verification pass failed to complete")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.verdict());
    }

    std::process::exit(if result.valid { 0 } else { 1 })
}

/// Runs live under `<config_dir>/witness/runs/<run-id>/`; `WITNESS_HOME`
/// overrides the base directory.
fn runs_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("WITNESS_HOME") {
        return Ok(PathBuf::from(home).join("runs"));
    }
    let config = dirs::config_dir().context("no config directory for this user")?;
    Ok(config.join("witness").join("runs"))
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();
}
