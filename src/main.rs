use std::time::Duration;

use tokio::sync::watch;

mod app;
mod auth;
mod cache;
mod config;
mod error;
mod mail;
mod policy;
mod posts;
mod ratelimit;
mod state;
mod store;
mod users;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "social=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (app_state, pool) = state::AppState::init().await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!(env = %app_state.config.env, "migrations applied");

    let (stop_tx, stop_rx) = watch::channel(false);
    let purge = app::spawn_invitation_purge(app_state.storage.clone(), PURGE_INTERVAL, stop_rx);

    let app = app::build_app(app_state);
    app::serve(app, app::shutdown_signal()).await?;

    let _ = stop_tx.send(true);
    purge.await?;
    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}
