//! Entry point: initializes structured logging, loads configuration from the
//! environment, and serves the dialect-translating proxy (§4.12).

use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = dg_gateway::GatewayConfig::load()?;
    let listen_addr = config.listen_addr.clone();
    let router = dg_gateway::build_router(config);

    tracing::info!(addr = %listen_addr, "dialect-gateway listening");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
