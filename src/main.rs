use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use petstore_api::{
    app,
    config::{init_tracing, load_config},
    db,
    events::{process_events, EventSender},
    handlers::AppServices,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    init_tracing(&config.log_level, config.log_json);
    let config = Arc::new(config);

    let pool = db::establish_connection(&config)
        .await
        .context("failed to connect to database")?;
    if config.auto_migrate {
        db::ensure_schema(&pool)
            .await
            .context("failed to create schema")?;
    }
    let pool = Arc::new(pool);

    let (tx, rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = Arc::new(EventSender::new(tx));
    tokio::spawn(process_events(rx));

    let services = AppServices::new(pool.clone(), config.clone(), event_sender.clone());
    let state = AppState {
        db: pool,
        config: config.clone(),
        event_sender,
        services,
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "listening");

    axum::serve(listener, app(state))
        .await
        .context("server error")?;
    Ok(())
}
