//! One-off address check
//!
//! Usage: `check_address [--env <name>] <BTC|TRC20|BEP20> <address>`
//!
//! Refreshes the directory, polls the given address once, forwards anything
//! new to the ledger and prints the deposits as JSON.

use anyhow::{Context, bail};

use deposit_sentinel::config::AppConfig;
use deposit_sentinel::deposit::Chain;
use deposit_sentinel::sentinel::build_monitor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut env = "dev".to_string();
    let mut positional = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--env" || arg == "-e" {
            env = args.next().context("--env needs a value")?;
        } else {
            positional.push(arg);
        }
    }
    let [network, address] = positional.as_slice() else {
        bail!("usage: check_address [--env <name>] <BTC|TRC20|BEP20> <address>");
    };
    let Some(chain) = Chain::from_network(network) else {
        bail!("unsupported network: {network}");
    };

    let config = AppConfig::load(&env)?;
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.as_str())
        .init();

    let monitor = build_monitor(&config)?;
    if !monitor.refresh_directory().await {
        eprintln!("warning: directory refresh failed, owner lookups will miss");
    }

    let deposits = monitor.check_address(chain, address).await?;
    println!("{}", serde_json::to_string_pretty(&deposits)?);
    Ok(())
}
