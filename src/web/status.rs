//! Health and metrics handlers.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::trace;

use crate::events::EventMetrics;
use crate::kv::KvMetrics;
use crate::state::AppState;
use crate::upstream::breaker::BreakerMetrics;
use crate::upstream::limiter::RateLimitSnapshot;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub cache: KvMetrics,
    pub breaker: BreakerMetrics,
    pub events: EventMetrics,
    pub rate_limit: RateLimitSnapshot,
    pub timestamp: String,
}

/// Health check endpoint. Probes the KV store so `kv` reflects live state.
pub(super) async fn health(State(state): State<AppState>) -> Json<Value> {
    trace!("health check requested");
    let kv_up = state.kv.ping().await;
    Json(json!({
        "status": if kv_up { "healthy" } else { "degraded" },
        "kv": kv_up,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Metrics endpoint for monitoring.
pub(super) async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let upstream = state.api.metrics();
    Json(MetricsResponse {
        cache: upstream.kv,
        breaker: upstream.breaker,
        events: state.invalidator.metrics(),
        rate_limit: upstream.rate_limit,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
