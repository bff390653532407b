use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use rental_portal::config::AppConfig;
use rental_portal::db;
use rental_portal::routes;
use rental_portal::services::api::ReqwestTransport;
use rental_portal::state::AppState;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.razorpay_key_id.is_empty() {
        tracing::warn!("RAZORPAY_KEY_ID is not set; the checkout overlay will refuse to open");
    }
    tracing::info!("using rental backend at {}", config.api_base_url);

    let transport = ReqwestTransport::new(config.api_base_url.clone());
    let state = Arc::new(AppState::new(conn, config.clone(), Box::new(transport)));
    state.purge_expired_sessions()?;

    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.purge_expired_sessions() {
                tracing::error!(error = %e, "failed to purge expired sessions");
            }
        }
    });

    let app = routes::app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
