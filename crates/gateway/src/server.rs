use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use inference::{DetectResponse, ImageFetcher};
use serde::Deserialize;
use std::future::Future;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectRequest {
    pub image_url: String,
}

pub fn router<F>(state: AppState<F>) -> Router
where
    F: ImageFetcher + 'static,
{
    Router::new()
        .route("/detect", post(detect_handler::<F>))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn run_server<F>(
    bind_addr: &str,
    state: AppState<F>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()>
where
    F: ImageFetcher + 'static,
{
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Detection server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}

async fn detect_handler<F>(
    State(state): State<AppState<F>>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectResponse>, ApiError>
where
    F: ImageFetcher + 'static,
{
    let Json(request) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    validate_image_url(&request.image_url)?;

    let response = state.pipeline.detect(&request.image_url).await?;
    Ok(Json(response))
}

async fn health_handler() -> &'static str {
    "ok"
}

fn validate_image_url(raw: &str) -> Result<(), ApiError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| ApiError::invalid_request(format!("invalid image_url {:?}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ApiError::invalid_request(format!(
            "unsupported image_url scheme {:?}",
            other
        ))),
    }
}
