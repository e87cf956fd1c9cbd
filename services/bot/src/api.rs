//! Admin HTTP API
//!
//! Provides liveness, in-memory statistics and an administrative reset of the
//! rate limiter.

use crate::app::{App, Stats};
use crate::config::ApiConfig;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Create the API router
pub fn create_router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/admin/rate-limit/reset", post(reset_rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn health_check(State(app): State<Arc<App>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": app.config().service.name,
    }))
}

async fn stats(State(app): State<Arc<App>>) -> Json<Stats> {
    Json(app.stats())
}

async fn reset_rate_limit(State(app): State<Arc<App>>) -> impl IntoResponse {
    let cleared = app.rate_limiter().len();
    app.rate_limiter().reset();
    info!(cleared, "Rate limiter reset via admin API");

    Json(serde_json::json!({
        "status": "reset",
        "cleared": cleared,
    }))
}

/// Start the admin API server, stopping gracefully on `shutdown`
pub async fn start_api_server(app: Arc<App>, config: &ApiConfig, shutdown: CancellationToken) -> Result<()> {
    let router = create_router(app);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting admin API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStorage;
    use crate::transport::testing::RecordingTransport;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Arc<App> {
        Arc::new(App::new(
            Config::with_token("test"),
            Arc::new(MemoryStorage::new()),
            Arc::new(RecordingTransport::new()),
        ))
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_router(app())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let app = app();
        app.rate_limiter().allow(1);
        app.rate_limiter().allow(2);

        let response = create_router(app.clone())
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            json(response).await,
            serde_json::json!({
                "active_uploads": 0,
                "active_searches": 0,
                "tracked_rate_limit_users": 2
            })
        );

        let response = create_router(app.clone())
            .oneshot(
                Request::post("/admin/rate-limit/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["cleared"], 2);
        assert!(app.rate_limiter().is_empty());
    }

    #[tokio::test]
    async fn test_reset_requires_post() {
        let response = create_router(app())
            .oneshot(Request::get("/admin/rate-limit/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
