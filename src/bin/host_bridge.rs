//! Headless timer host for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! dispatches them to the timer service, and writes `ResponseEnvelope` and
//! `EventEnvelope` messages to stdout. Saved timers are restored on start.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.
//!
//! `COUNTDOWN_CONFIG` points at an alternative config file.

use countdown::TimerConfig;
use countdown::host::run_stdio_bridge;
use countdown::timer::JsonFileStore;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var_os("COUNTDOWN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(TimerConfig::default_config_path);
    let config = TimerConfig::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("cannot load config {}: {e}", config_path.display()))?;

    let state_path = config.persistence.resolved_state_path();
    tracing::info!(
        config = %config_path.display(),
        state = %state_path.display(),
        identity = %config.persistence.identity,
        "countdown-host starting"
    );

    let store = Arc::new(JsonFileStore::new(state_path));
    run_stdio_bridge(&config, store).await.map_err(|e| {
        tracing::error!(error = %e, "countdown-host exited with error");
        anyhow::anyhow!("countdown-host failed: {e}")
    })?;

    tracing::info!("countdown-host shut down cleanly");
    Ok(())
}
