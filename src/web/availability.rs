//! Availability query handler.

use axum::extract::{Query, State};
use axum::response::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use crate::state::AppState;
use crate::upstream::models::ClubAvailability;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityParams {
    pub place_id: String,
    /// `YYYY-MM-DD`.
    pub date: NaiveDate,
}

/// `GET /api/availability?placeId=…&date=…`
///
/// Always 200 with an array; empty when neither upstream nor cache can
/// produce anything. Malformed parameters are rejected by the extractor.
pub(super) async fn get_availability(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityParams>,
) -> Json<Vec<ClubAvailability>> {
    debug!(place_id = %params.place_id, date = %params.date, "availability query");
    let tree = state
        .planner
        .get_availability(&params.place_id, params.date)
        .await;
    Json(tree)
}
