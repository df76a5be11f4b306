use anyhow::{Context as _, Result};
use chat_context::api::{build_router, AppState};
use chat_context::config::Config;
use chat_context::{init_tracing, ChatService};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(&config.logging).map_err(anyhow::Error::msg)?;

    let counter = config.build_token_counter()?;
    let manager = Arc::new(config.build_manager().await?);
    let responder = config.build_responder()?;
    let chat = Arc::new(ChatService::new(manager.clone(), responder, counter.clone()));

    let state = AppState {
        manager: manager.clone(),
        chat,
        counter,
        rehydrate_limit: config.strategies.batched_summary.rehydrate_limit,
    };
    let app = build_router(state, config.server.max_body_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(
        "Listening on {} (default strategy: {})",
        addr,
        manager.active_strategy()
    );

    axum::serve(listener, app).await?;
    Ok(())
}
