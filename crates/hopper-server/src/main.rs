use tracing_subscriber::EnvFilter;

use hopper_core::{AppConfig, HopperError};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hopper=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Hopper stopped");
        std::process::exit(1);
    }
}

async fn run() -> hopper_core::Result<()> {
    let config = AppConfig::from_env();
    config.validate()?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = hopper_server::build_state(config).await?;
    tracing::info!(
        graph = state.graph.backend(),
        generator = %state.generator_name,
        "Collaborators ready"
    );
    let app = hopper_server::app(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| HopperError::Config(format!("cannot bind {addr}: {e}")))?;
    tracing::info!("Hopper server listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| HopperError::Internal(format!("server error: {e}")))
}
