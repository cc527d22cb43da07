mod bridge;
mod config;

use tracing_subscriber::EnvFilter;

use linkmate_ha_connection::{ClientConfig, HaClient};

use config::BridgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,linkmate=debug")),
        )
        .init();

    let first_run = !BridgeConfig::exists();
    let cfg = BridgeConfig::load()?;
    if first_run && let Err(e) = cfg.save() {
        tracing::warn!(error = %e, "failed to write initial configuration");
    }

    if !cfg.is_complete() {
        anyhow::bail!(
            "hub URL and access token are required; set them in the config file \
             or via LINKMATE_BASE_URL and LINKMATE_ACCESS_TOKEN"
        );
    }

    tracing::info!(
        device = %cfg.device_id,
        name = %cfg.device_name,
        version = env!("CARGO_PKG_VERSION"),
        "starting LinkMate bridge"
    );

    let client = HaClient::new(ClientConfig::for_device(&cfg.device_id));
    bridge::run(cfg, client).await
}
