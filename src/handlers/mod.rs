pub mod admin;
pub mod checkout;
pub mod webhook;

use axum::routing::get;
use axum::Router;

use crate::AppState;

/// Assembles all HTTP surfaces.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(webhook::router())
        .merge(admin::router())
        .merge(checkout::router())
}

async fn health() -> &'static str {
    "ok"
}
