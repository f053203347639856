//! Deposit Sentinel service
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ Directory │───▶│ Watchers │───▶│  Ledger  │
//! │  (YAML)  │    │ (refresh) │    │(poll/ws) │    │  (POST)  │
//! └──────────┘    └───────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Usage: `deposit_sentinel [--env <name>]` reads `config/<name>.yaml`
//! (default `dev`) and runs until Ctrl-C.

use anyhow::Context;
use tracing::info;

use deposit_sentinel::config::AppConfig;
use deposit_sentinel::logging::init_logging;
use deposit_sentinel::sentinel::build_monitor;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for env {env}"))?;
    let _guard = init_logging(&config);

    info!(env = %env, "Deposit sentinel starting");

    let monitor = build_monitor(&config).context("building HTTP clients")?;
    monitor.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutdown signal received");
    monitor.stop();

    let status = monitor.status();
    info!(
        delivered = status.deliveries.batches_delivered,
        failed = status.deliveries.batches_failed,
        processed = status.deliveries.deposits_processed,
        "Deposit sentinel stopped"
    );
    Ok(())
}
