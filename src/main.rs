use std::sync::Arc;

use chrono::Duration;
use tracing_subscriber::EnvFilter;

use curator_api::{
    api::{create_router, AppState},
    config::Config,
    db::{create_pool, init_schema, PostgresStore},
    services::{
        history::HistoryApiProvider,
        providers::{openai::OpenAiGenerator, Generator, GeneratorPool},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    init_schema(&pool).await?;
    let store = Arc::new(PostgresStore::new(pool));

    let history_provider = Arc::new(HistoryApiProvider::new(
        config.history_api_url.clone(),
        config.history_api_key.clone(),
    ));

    // One backend per configured key, rotated round-robin. An empty pool is
    // allowed: the catalog serves a placeholder explaining the problem.
    let backends: Vec<Arc<dyn Generator>> = config
        .generation_keys()
        .into_iter()
        .map(|key| {
            Arc::new(OpenAiGenerator::new(
                key,
                config.generation_api_url.clone(),
                config.generation_model.clone(),
            )) as Arc<dyn Generator>
        })
        .collect();
    if backends.is_empty() {
        tracing::warn!("No generation API keys configured; catalogs will serve a setup notice");
    }
    let generators = Arc::new(GeneratorPool::new(backends));

    let state = AppState::new(
        store,
        history_provider,
        generators,
        Duration::seconds(config.history_ttl_secs as i64),
        Duration::seconds(config.recommendation_ttl_secs as i64),
    );

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server running");
    axum::serve(listener, app).await?;

    Ok(())
}
