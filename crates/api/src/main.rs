use anyhow::Context;
use helpdesk_api::{
    create_router,
    store::{MemoryStore, PgStore, TicketStore},
    AppState, Config,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("helpdesk_api=info,tower_http=info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn TicketStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = helpdesk_shared::create_pool(url, config.database_max_connections)
                .await
                .context("failed to connect to database")?;
            helpdesk_shared::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("invalid configuration")?;
    init_logging(config.log_json);

    let store = open_store(&config).await?;
    tracing::info!(backend = store.backend_name(), "Ticket store ready");

    let bind_address = config.bind_address.clone();
    let app = create_router(AppState::new(config, store));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Helpdesk API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
