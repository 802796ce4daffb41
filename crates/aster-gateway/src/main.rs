//! Operator binary: schema init, credentials migration, and the daemon.

mod migrate;
mod terminal;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aster_agent::Agent;
use aster_core::config::AsterConfig;
use aster_scheduler::Scheduler;
use aster_store::Store;

#[derive(Parser)]
#[command(name = "aster", about = "Multi-channel conversational agent daemon")]
struct Cli {
    /// Path to aster.toml (default: ~/.aster/aster.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the agent daemon.
    Start {
        /// Attach the interactive terminal channel on stdin/stdout.
        #[arg(long)]
        terminal: bool,
    },
    /// Create or migrate the database schema (idempotent).
    InitDb,
    /// Move legacy environment/file secrets into the credential store.
    MigrateCredentials,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AsterConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::InitDb => {
            let _store = Store::open(
                &config.database.path,
                config.database.pool_min,
                config.database.pool_max,
            )
            .await
            .context("opening database")?;
            println!("Database ready at {}", config.database.path);
            Ok(())
        }

        Command::MigrateCredentials => {
            let store = Store::open(
                &config.database.path,
                config.database.pool_min,
                config.database.pool_max,
            )
            .await
            .context("opening database")?;
            let migrated = migrate::run(&store).await?;
            println!("Migrated {migrated} credential(s) into the config store.");
            Ok(())
        }

        Command::Start { terminal } => {
            let agent = Arc::new(Agent::start(&config).await.context("starting agent")?);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let scheduler = Scheduler::new(agent.ctx.store.clone(), agent.clone());
            let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

            if terminal {
                terminal::run(agent.clone()).await?;
            } else {
                info!("agent running; Ctrl-C to stop");
                tokio::signal::ctrl_c().await?;
            }

            let _ = shutdown_tx.send(true);
            let _ = scheduler_handle.await;
            info!("shutdown complete");
            Ok(())
        }
    }
}
