//! Application state shared across web handlers.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::availability::AvailabilityPlanner;
use crate::events::Invalidator;
use crate::kv::KvStore;
use crate::upstream::CourtsApi;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub api: CourtsApi,
    pub planner: AvailabilityPlanner,
    pub invalidator: Arc<Invalidator>,
    pub kv: Arc<KvStore>,
}
