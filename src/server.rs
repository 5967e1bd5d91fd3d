use axum::{
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{HEALTH_URL, METRICS_URL};
use crate::context::AppContext;

const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Create the HTTP server router
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route(
            METRICS_URL,
            get(move || async move { metrics_handler(app_context.clone()).await }),
        )
        .route(HEALTH_URL, get(health_handler))
}

/// Index page handler
async fn index_page() -> impl IntoResponse {
    debug!("Index page request received");
    let html = r#"<html>
    <head><title>GPU Pod Mapper</title></head>
    <body>
    <h1>Available HTTP endpoints:</h1>
    <ul>
    <li><b><a href='/metrics'>/metrics</a></b>: GPU metrics attributed to Kubernetes workloads</li>
    <li><b><a href='/healthz'>/healthz</a></b>: Liveness check</li>
    </ul>
    </body>
    </html>"#;
    Html(html).into_response()
}

/// Metrics endpoint handler
async fn metrics_handler(ctx: Arc<AppContext>) -> impl IntoResponse {
    debug!("Metrics request received");

    match ctx.metrics_cache().get_metrics().await {
        Some(snapshot) => {
            let age_ms = snapshot
                .collected_at
                .elapsed()
                .map(|age| age.as_millis())
                .unwrap_or_default();
            debug!(
                samples = snapshot.sample_count,
                output_size = snapshot.text.len(),
                age_ms = age_ms,
                "Returning cached metrics"
            );
            (
                StatusCode::OK,
                [("Content-Type", TEXT_CONTENT_TYPE)],
                snapshot.text.clone(),
            )
                .into_response()
        }
        None => {
            warn!("No metrics collected yet");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("Content-Type", TEXT_CONTENT_TYPE)],
                "No metrics collected yet".to_string(),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Start the HTTP server
pub async fn start_server(listen_address: &str, app_context: AppContext) -> anyhow::Result<()> {
    let app_context = Arc::new(app_context);
    let router = create_router(app_context);

    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    info!("Server listening on {}", listen_address);

    axum::serve(listener, router).await?;

    Ok(())
}
