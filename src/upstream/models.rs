//! Wire types for the upstream courts-rental API and the assembled
//! availability tree.
//!
//! Clubs and courts are opaque to the core beyond their identifiers: every
//! other field round-trips through a flattened JSON map so upstream schema
//! additions survive caching without a redeploy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A club as returned by `GET /clubs?placeId=…`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Club {
    pub id: i64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A court as returned by `GET /clubs/{clubId}/courts`.
///
/// `clubId` is optional on the wire (the nesting already scopes it); when
/// present it matches the club the court was fetched under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Court {
    pub id: i64,
    #[serde(rename = "clubId", default, skip_serializing_if = "Option::is_none")]
    pub club_id: Option<i64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A bookable slot. Opaque to the core except for `datetime`, from which the
/// invalidation engine derives the slot's calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub datetime: DateTime<Utc>,
    pub start: String,
    pub end: String,
    /// Minutes.
    pub duration: u32,
    pub price: f64,
    #[serde(rename = "_priority")]
    pub priority: i32,
}

/// One court with its available slots, in upstream order.
#[derive(Debug, Clone, Serialize)]
pub struct CourtAvailability {
    #[serde(flatten)]
    pub court: Court,
    pub available: Vec<Slot>,
}

/// One club with its courts, in upstream order. The full query response is
/// an ordered `Vec<ClubAvailability>`.
#[derive(Debug, Clone, Serialize)]
pub struct ClubAvailability {
    #[serde(flatten)]
    pub club: Club,
    pub courts: Vec<CourtAvailability>,
}
