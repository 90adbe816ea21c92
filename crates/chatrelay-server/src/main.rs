use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay_core::config::RelayConfig;
use chatrelay_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrelay_server=info,chatrelay_llm=info".into()),
        )
        .init();

    let config = RelayConfig::from_env();
    let addr = config.bind_addr.clone();
    let state = AppState::new(config);
    tracing::info!(model = state.model.model_name(), "using chat model");

    let app = chatrelay_server::app_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Chat relay listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
