//! Daemon entry point.
//!
//! Usage: `warden [config.toml]`. The platform token can also be supplied
//! via the `WARDEN_TOKEN` environment variable, which takes precedence
//! over the config file.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use warden::Lifecycle;
use warden::WardenConfig;
use warden::platform::discord::DiscordTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(WardenConfig::default_config_path);
    let mut config = WardenConfig::load_or_default(&config_path)?;

    if let Ok(token) = std::env::var("WARDEN_TOKEN") {
        config.token = token;
    }
    if config.token.is_empty() {
        anyhow::bail!(
            "no platform token configured; set `token` in {} or export WARDEN_TOKEN",
            config_path.display()
        );
    }

    let transport = Arc::new(DiscordTransport::new(&config));
    let lifecycle = Lifecycle::new(config, transport);

    tracing::info!("warden v{} starting", env!("CARGO_PKG_VERSION"));
    lifecycle
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
