use axum::{routing::get, Router};

use crate::publishing;

async fn health() -> &'static str {
    "ok"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/health", get(health))
        .merge(publishing::routes())
}
