use std::sync::Arc;

use anyhow::Context;
use gigchat::{AppState, Config, app, store::SqliteMessageStore};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gigchat=debug,tower_http=info,info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    let store = SqliteMessageStore::open(db_pool).await?;

    let bind = config.bind;
    let socket_path = config.socket_path.clone();
    if config.dev_login {
        info!("development login enabled");
    }

    let app = app(AppState::new(Arc::new(store), config))?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("listening on {bind}, socket at {socket_path}");
    axum::serve(listener, app).await?;
    Ok(())
}
