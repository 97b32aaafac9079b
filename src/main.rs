use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reportero::config::Config;
use reportero::delivery::N8nRelay;
use reportero::openai::OpenAiApi;
use reportero::sessions::SessionRegistry;
use reportero::store::PgStore;
use reportero::tools::{HttpToolExecutor, ToolRegistry};
use reportero::types::AppState;
use reportero::webhook;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .expect("failed to build http client");

    let store = Arc::new(PgStore::new(db));
    let state = Arc::new(AppState {
        directory: store.clone(),
        store,
        model: Arc::new(OpenAiApi::new(client.clone(), &config)),
        tools: ToolRegistry::standard(),
        executor: Arc::new(HttpToolExecutor::new(client.clone(), &config)),
        delivery: Arc::new(N8nRelay::new(client, &config)),
        sessions: SessionRegistry::new(),
        config,
    });

    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    info!(%addr, "reportero server listening");
    axum::serve(listener, webhook::router(state))
        .await
        .expect("server runtime failure");
}
