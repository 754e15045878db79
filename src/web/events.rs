//! Event ingestion handler.

use axum::extract::{Json, State};
use serde_json::{Value, json};

use crate::events::IngestEvent;
use crate::state::AppState;

/// `POST /api/events`
///
/// Malformed bodies (including unknown `type` tags) are rejected by the
/// JSON extractor before reaching the engine. Well-formed events are always
/// accepted; processing failures only move the error counter.
pub(super) async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<IngestEvent>,
) -> Json<Value> {
    state.invalidator.apply(&event).await;
    Json(json!({ "status": "accepted" }))
}
