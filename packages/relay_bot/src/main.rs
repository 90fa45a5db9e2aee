use anyhow::{Context, Result};
use clap::Parser;
use relay_core::{Relay, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

mod config;
mod dispatch;
mod state_file;
mod telegram;

use crate::config::{BotConfig, DataDir, FileConfig, load_config};
use crate::dispatch::Dispatcher;
use crate::state_file::JsonStateFile;
use crate::telegram::BotApi;

#[derive(Parser)]
#[command(name = "relay-bot")]
#[command(about = "Relays private chats into per-user topics of a staff forum group")]
struct Cli {
    /// Custom data directory (defaults to ~/.relay-bot)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to <data-dir>/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "relay_bot=debug,relay_core=debug,info"
    } else {
        "relay_bot=info,relay_core=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let data_dir = DataDir::new(cli.data_dir)?;
    let config_path = cli.config.unwrap_or_else(|| data_dir.config_toml_path());
    let file_config: FileConfig = load_config(&config_path)
        .extract()
        .with_context(|| format!("invalid configuration ({:?})", config_path))?;
    let config = BotConfig::from_file(&file_config, &data_dir.root)?;

    info!(
        workspace = %config.relay.workspace,
        captcha = config.relay.captcha.name(),
        "Starting relay bot"
    );

    let api = BotApi::new(&config.api_url, &config.token)?;
    let me = api.get_me().await.context("bot API rejected the token")?;
    info!(
        "Authorized as @{}",
        me.username.as_deref().unwrap_or(&me.first_name)
    );

    let store = Arc::new(JsonStateFile::new(&config.state_file));
    info!("Using state file {:?}", store.path());
    let state = store.load();
    let store: Arc<dyn StateStore> = store;
    let relay = Arc::new(Relay::new(
        config.relay.clone(),
        Arc::new(api.clone()),
        store,
        state,
    ));

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_links(
        relay.clone(),
        config.sweep_interval,
        cancel.clone(),
    ));
    let poller = tokio::spawn(
        Dispatcher::new(api, relay.clone(), config.poll_timeout).run(cancel.clone()),
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");
    cancel.cancel();

    let (polled, swept) = tokio::join!(poller, sweeper);
    if let Err(e) = polled.and(swept) {
        warn!("Background task ended abnormally: {}", e);
    }
    log_metrics(&relay);
    Ok(())
}

/// Drop expired message links every `period`, starting one period after boot.
async fn sweep_links(relay: Arc<Relay>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Link sweeper cancelled");
                break;
            }
            _ = interval.tick() => {
                relay.sweep_links().await;
                log_metrics(&relay);
            }
        }
    }
}

fn log_metrics(relay: &Relay) {
    match serde_json::to_string(&relay.metrics().snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Relay metrics"),
        Err(e) => warn!("Failed to serialize metrics: {}", e),
    }
}
