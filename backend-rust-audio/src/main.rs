mod api;
mod config;

use std::sync::Arc;

use audio_vault_core::{AudioVault, VaultConfig};
use tracing::info;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so RUST_LOG from it applies to the subscriber.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "backend_rust_audio=info,audio_vault_core=info,tower_http=info".into()
            }),
        )
        .init();

    let server = ServerConfig::from_env()?;
    let vault_config = VaultConfig::from_env();

    info!(
        host = %server.host,
        max_chunk_bytes = server.max_chunk_bytes,
        "Initializing audio vault"
    );

    let vault = Arc::new(AudioVault::open(vault_config).await?);
    let app = api::router(vault, server.max_chunk_bytes);

    let addr = server.addr();
    info!(addr = %addr, port = server.port, "Starting audio vault server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
