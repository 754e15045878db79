//! Event ingestion: upstream mutation events translated into the minimal
//! set of cache invalidations.
//!
//! Processing never fails the ingestion endpoint. Every failure below the
//! controller line is caught here and recorded on the `errors` counter.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

use crate::cache::{CacheKind, TieredCache, keys};
use crate::upstream::models::Slot;

/// Forward window of composite availability entries swept on every event.
const AVAILABILITY_SWEEP_DAYS: i64 = 7;

/// Club fields an upstream mutation may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClubField {
    Attributes,
    Openhours,
    LogoUrl,
    BackgroundUrl,
}

/// Court fields an upstream mutation may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourtField {
    Attributes,
    Name,
}

/// The ingestion wire format: a union discriminated on `type`. Unknown tags
/// and unknown field names fail deserialization at the controller, before
/// reaching the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
    #[serde(rename_all = "camelCase")]
    BookingCreated {
        club_id: i64,
        court_id: i64,
        slot: Slot,
    },
    #[serde(rename_all = "camelCase")]
    BookingCancelled {
        club_id: i64,
        court_id: i64,
        slot: Slot,
    },
    #[serde(rename_all = "camelCase")]
    ClubUpdated {
        club_id: i64,
        #[serde(default)]
        fields: Vec<ClubField>,
    },
    #[serde(rename_all = "camelCase")]
    CourtUpdated {
        club_id: i64,
        court_id: i64,
        #[serde(default)]
        fields: Vec<CourtField>,
    },
}

/// The calendar day a slot belongs to, in the upstream's timezone.
pub fn slot_day(datetime: &DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    datetime.with_timezone(&offset).date_naive()
}

/// Snapshot of the event counters for the metrics surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetrics {
    pub processed: u64,
    pub errors: u64,
    pub last_processed: Option<DateTime<Utc>>,
    pub success_rate: f64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    errors: AtomicU64,
    last_processed: Mutex<Option<DateTime<Utc>>>,
}

/// Translates ingested events into cache mutations.
pub struct Invalidator {
    cache: TieredCache,
    /// Places whose composite availability entries are swept on every
    /// event; static configuration (`PREFETCH_PLACE_IDS`).
    place_ids: Vec<String>,
    /// Timezone used to derive a slot's calendar day and the sweep anchor.
    day_offset: FixedOffset,
    counters: Counters,
}

impl Invalidator {
    pub fn new(cache: TieredCache, place_ids: Vec<String>, utc_offset_minutes: i32) -> Self {
        let day_offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        Self {
            cache,
            place_ids,
            day_offset,
            counters: Counters::default(),
        }
    }

    /// Process one event. Infallible by contract: failures are logged and
    /// counted, never propagated to the producer.
    pub async fn apply(&self, event: &IngestEvent) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        *self.counters.last_processed.lock().unwrap() = Some(Utc::now());

        if let Err(err) = self.invalidate_for(event).await {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            error!(error = %err, ?event, "event invalidation failed");
        }
    }

    pub fn metrics(&self) -> EventMetrics {
        let processed = self.counters.processed.load(Ordering::Relaxed);
        let errors = self.counters.errors.load(Ordering::Relaxed);
        EventMetrics {
            processed,
            errors,
            last_processed: *self.counters.last_processed.lock().unwrap(),
            success_rate: if processed == 0 {
                1.0
            } else {
                (processed - errors) as f64 / processed as f64
            },
        }
    }

    async fn invalidate_for(&self, event: &IngestEvent) -> anyhow::Result<()> {
        let ok = match event {
            IngestEvent::ClubUpdated { club_id, .. } => self.club_updated(*club_id).await,
            IngestEvent::CourtUpdated { club_id, .. } => {
                let id = club_id.to_string();
                self.cache
                    .invalidate_keys(&[
                        keys::fresh_key(CacheKind::Courts, &[&id]),
                        keys::stale_key(CacheKind::Courts, &[&id]),
                    ])
                    .await
            }
            IngestEvent::BookingCreated {
                club_id,
                court_id,
                slot,
            }
            | IngestEvent::BookingCancelled {
                club_id,
                court_id,
                slot,
            } => self.booking_changed(*club_id, *court_id, slot).await,
        };

        let swept = self.sweep_availability().await;

        if ok && swept {
            Ok(())
        } else {
            Err(anyhow::anyhow!("KV backend rejected one or more deletes"))
        }
    }

    /// `club_updated`: scope the `clubs` invalidation to the club's place
    /// via the reverse index when available; otherwise sweep both tiers of
    /// the whole `clubs` keyspace. The club's `courts` entry goes either way.
    async fn club_updated(&self, club_id: i64) -> bool {
        let mut ok = true;
        match self.cache.club_place(club_id).await {
            Some(place_id) => {
                ok &= self
                    .cache
                    .invalidate_keys(&[
                        keys::fresh_key(CacheKind::Clubs, &[&place_id]),
                        keys::stale_key(CacheKind::Clubs, &[&place_id]),
                    ])
                    .await;
            }
            None => {
                debug!(club_id, "no reverse index entry, invalidating clubs globally");
                self.cache.invalidate_by_pattern("clubs:*").await;
            }
        }

        let id = club_id.to_string();
        ok &= self
            .cache
            .invalidate_keys(&[
                keys::fresh_key(CacheKind::Courts, &[&id]),
                keys::stale_key(CacheKind::Courts, &[&id]),
            ])
            .await;
        ok
    }

    /// A booking mutation invalidates exactly the slot entry for the day the
    /// slot falls on.
    async fn booking_changed(&self, club_id: i64, court_id: i64, slot: &Slot) -> bool {
        let club = club_id.to_string();
        let court = court_id.to_string();
        let day = slot_day(&slot.datetime, self.day_offset).to_string();
        self.cache
            .invalidate_keys(&[
                keys::fresh_key(CacheKind::Slots, &[&club, &court, &day]),
                keys::stale_key(CacheKind::Slots, &[&club, &court, &day]),
            ])
            .await
    }

    /// Composite availability keys name a place, not a club, so the sweep
    /// iterates the configured places across the forward window.
    async fn sweep_availability(&self) -> bool {
        if self.place_ids.is_empty() {
            return true;
        }
        let today = Utc::now().with_timezone(&self.day_offset).date_naive();
        let mut doomed = Vec::new();
        for place_id in &self.place_ids {
            for ahead in 0..AVAILABILITY_SWEEP_DAYS {
                let day = (today + chrono::Duration::days(ahead)).to_string();
                doomed.push(keys::fresh_key(CacheKind::Availability, &[place_id, &day]));
                doomed.push(keys::stale_key(CacheKind::Availability, &[place_id, &day]));
            }
        }
        self.cache.invalidate_keys(&doomed).await
    }
}
