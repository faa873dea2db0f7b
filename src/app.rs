use std::{future::Future, net::SocketAddr, time::Duration};

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::{signal, sync::watch, task::JoinHandle};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{auth, posts, ratelimit, state::AppState, store::Storage, users};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Browser access for the single configured origin. An origin that does not
/// parse as a header value admits no browser origin at all.
fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let origins = match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => vec![origin],
        Err(e) => {
            warn!(error = %e, origin = allowed_origin, "invalid CORS origin, cross-origin requests disabled");
            Vec::new()
        }
    };
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(300))
}

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origin);
    Router::new()
        .nest(
            "/v1",
            Router::new()
                .route("/health", get(health))
                .merge(auth::router())
                .merge(users::router())
                .merge(posts::router()),
        )
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
        // Last layer runs first: rejected clients never reach a handler.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ratelimit::rate_limit,
        ))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "env": state.config.env,
        "version": VERSION,
    }))
}

/// Periodically deletes users whose invitation expired before activation.
/// Returns once `stop` flips or its sender is dropped; a purge already in
/// flight finishes first.
pub fn spawn_invitation_purge(
    storage: Storage,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => {
                    info!("invitation purge stopped");
                    return;
                }
            }
            match storage.users.purge_expired_invitations().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "purged expired pending users"),
                Err(e) => error!(error = %e, "invitation purge failed"),
            }
        }
    })
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "signal caught"),
        _ = terminate => info!(signal = "SIGTERM", "signal caught"),
    }
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn serve<F>(app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    info!("server stopped");
    Ok(())
}
