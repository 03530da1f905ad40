//! Minimal HTTP health-check endpoint, so an orchestrator can probe liveness
//! of the demo process independently of the consume pipeline's own result stream.

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

pub fn health_router() -> Router {
    Router::new().route("/health", get(health_handler))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn serve_health(port: u16, shutdown: impl std::future::Future<Output = ()> + Send + 'static) {
    let app = health_router();
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind health endpoint");

    tracing::info!(port, "health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("health server error");
}
