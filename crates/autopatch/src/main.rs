//! autopatch - unattended package update runner

use anyhow::{Context, Result};
use autopatch::backend::{DnfBackend, SystemHost};
use autopatch::cli::{exit_code, Cli, EXIT_FAILURE};
use autopatch::emitters::EmitterSet;
use autopatch::{cancel_pair, CancelHandle, Orchestrator};
use autopatch_common::{ProcessLock, TimestampStore};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("autopatch: {:#}", e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let path = cli.config_path();
    // The configured level is unknown until the file is read
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(cli.env_filter("info"))
        .with_writer(std::io::stderr)
        .finish();
    let config = cli
        .load_config_with(bootstrap)
        .with_context(|| format!("Cannot load configuration {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(cli.env_filter(config.log_level()))
        .with_writer(std::io::stderr)
        .init();

    info!("autopatch v{} using {}", env!("CARGO_PKG_VERSION"), path.display());

    let backend = DnfBackend::new(
        Duration::from_secs(config.commands.metadata_timeout_secs),
        Duration::from_secs(config.apply.timeout_secs),
    );

    let mut emitters = EmitterSet::from_config(&config).context("Invalid emitter configuration")?;
    if cli.json {
        emitters = emitters.without("stdio");
    }

    let timestamps = TimestampStore::new(&config.state.timestamp_path);
    let lock = ProcessLock::new(&config.state.lock_path);
    let mut orchestrator = Orchestrator::new(
        config,
        Arc::new(backend),
        Arc::new(SystemHost::new()),
        emitters,
        timestamps,
        lock,
    )
    .with_timer(cli.timer);

    let (handle, token) = cancel_pair();
    tokio::spawn(cancel_on_signal(handle));

    let result = orchestrator.run(token).await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Cannot serialize run result")?
        );
    }

    Ok(exit_code(&result))
}

/// Cancel the run on SIGINT or SIGTERM
async fn cancel_on_signal(handle: CancelHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot install SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received, stopping"),
        _ = terminate.recv() => info!("SIGTERM received, stopping"),
    }
    handle.cancel();
}
