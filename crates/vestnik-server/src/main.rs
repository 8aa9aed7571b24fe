use tracing::info;
use tracing_subscriber::EnvFilter;

use vestnik_server::{api, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vestnik_server=debug")),
        )
        .init();

    info!("Starting Vestnik server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Run the HTTP API until Ctrl+C
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    if let Err(e) = api::serve(AppState::new(config), http_addr).await {
        tracing::error!(error = %e, "HTTP server failed");
        return Err(e);
    }

    Ok(())
}
