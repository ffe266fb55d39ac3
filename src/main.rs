use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use cli::args::{Cli, Commands};
use prefab_cloud::{ClientOptions, ConfigValue, Prefab};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let context = cli::parse_context(&cli.context)?;

    let mut options = ClientOptions::new(cli.api_key);
    if !cli.endpoints.is_empty() {
        options = options.with_endpoints(cli.endpoints);
    }
    if let Some(ms) = cli.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let prefab = Prefab::new();
    prefab
        .init(options, context)
        .await
        .context("Failed to load configs")?;

    let result = match cli.command {
        Commands::Get { key } => run_get(&prefab, &key),
        Commands::Dump => print_all(&prefab),
        Commands::Poll { every_ms, ticks } => run_poll(&prefab, every_ms, ticks).await,
    };

    prefab.flush_telemetry().await;
    result
}

fn run_get(prefab: &Prefab, key: &str) -> Result<()> {
    let Some(value) = prefab.get(key) else {
        bail!("No value for `{}`", key);
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_all(prefab: &Prefab) -> Result<()> {
    let values: BTreeMap<String, ConfigValue> = prefab.values().into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}

async fn run_poll(prefab: &Prefab, every_ms: u64, ticks: u64) -> Result<()> {
    let frequency = Duration::from_millis(every_ms);
    if let Err(e) = prefab.poll(frequency).await {
        tracing::warn!("Initial poll load failed: {}", e);
    }

    let mut seen = prefab.poll_count();
    while seen < ticks {
        tokio::time::sleep(frequency).await;
        let count = prefab.poll_count();
        if count != seen {
            seen = count;
            println!("--- tick {} ---", seen);
            print_all(prefab)?;
        }
    }

    prefab.stop_polling();
    Ok(())
}
