//! Web API router construction.

use axum::Router;
use axum::routing::{get, post};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;
use crate::web::{availability, events, status};

pub fn create_router(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/metrics", get(status::metrics))
        .route("/availability", get(availability::get_availability))
        .route("/events", post(events::ingest_event))
        .with_state(state);

    Router::new()
        .nest("/api", api_router)
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
}
