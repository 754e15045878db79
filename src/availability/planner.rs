//! Expands a `(placeId, date)` query into a bounded-concurrency fetch plan
//! and assembles the availability tree.
//!
//! The tree's shape is decided entirely by the `clubs` and `courts`
//! responses, in upstream order. Slot fetches can only fill in or leave
//! empty an `available` list; a slot-level failure never fails the query.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::cache::{CacheKind, keys};
use crate::upstream::CourtsApi;
use crate::upstream::coalesce::run_concurrent;
use crate::upstream::errors::UpstreamError;
use crate::upstream::models::{ClubAvailability, CourtAvailability, Slot};

#[derive(Clone)]
pub struct AvailabilityPlanner {
    api: CourtsApi,
    fan_out_courts: usize,
    fan_out_slots: usize,
}

impl AvailabilityPlanner {
    pub fn new(api: CourtsApi, fan_out_courts: usize, fan_out_slots: usize) -> Self {
        Self {
            api,
            fan_out_courts,
            fan_out_slots,
        }
    }

    /// Hydrate the full clubs -> courts -> available-slots tree for one place
    /// and day. Always returns a tree; when neither the upstream nor the
    /// cache can produce the backbone, the tree is empty.
    pub async fn get_availability(&self, place_id: &str, date: NaiveDate) -> Vec<ClubAvailability> {
        match self.plan(place_id, date).await {
            Ok(tree) => tree,
            Err(err) => {
                warn!(place_id, %date, error = %err, "availability plan failed, returning empty tree");
                Vec::new()
            }
        }
    }

    async fn plan(
        &self,
        place_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ClubAvailability>, UpstreamError> {
        let clubs = self.api.get_clubs(place_id).await?;
        if clubs.is_empty() {
            return Ok(Vec::new());
        }

        // One courts fetch per club, bounded, preserving club order.
        let court_tasks: Vec<_> = clubs
            .iter()
            .map(|club| {
                let api = self.api.clone();
                let club_id = club.id;
                async move { api.get_courts(club_id).await }
            })
            .collect();
        let courts_by_club = run_concurrent(court_tasks, self.fan_out_courts).await?;

        // Flat slot plan across all (club, court) pairs, remembering where
        // each task's result belongs.
        let mut positions = Vec::new();
        let mut slot_tasks = Vec::new();
        for (club_index, courts) in courts_by_club.iter().enumerate() {
            let club_id = clubs[club_index].id;
            for (court_index, court) in courts.iter().enumerate() {
                positions.push((club_index, court_index));
                let api = self.api.clone();
                let court_id = court.id;
                slot_tasks.push(async move {
                    // Slot failures degrade to an empty list; the tree's
                    // shape never depends on slots.
                    match api.get_available_slots(club_id, court_id, date).await {
                        Ok(slots) => Ok(slots),
                        Err(err) => {
                            debug!(
                                club_id,
                                court_id,
                                %date,
                                error = %err,
                                "slot fetch failed, treating as no availability"
                            );
                            Ok(Vec::new())
                        }
                    }
                });
            }
        }
        let flat_slots = run_concurrent(slot_tasks, self.fan_out_slots).await?;

        // Re-gather the flat results into per-club, per-court buckets.
        let mut slots_by_position: Vec<Vec<Vec<Slot>>> = courts_by_club
            .iter()
            .map(|courts| vec![Vec::new(); courts.len()])
            .collect();
        for ((club_index, court_index), slots) in positions.into_iter().zip(flat_slots) {
            slots_by_position[club_index][court_index] = slots;
        }

        let tree = clubs
            .into_iter()
            .zip(courts_by_club)
            .zip(slots_by_position)
            .map(|((club, courts), club_slots)| ClubAvailability {
                club,
                courts: courts
                    .into_iter()
                    .zip(club_slots)
                    .map(|(court, available)| CourtAvailability { court, available })
                    .collect(),
            })
            .collect();
        Ok(tree)
    }

    /// Drop composite availability entries for a place: one day's pair of
    /// keys when `date` is given, otherwise every key under the place.
    pub async fn invalidate_place(&self, place_id: &str, date: Option<NaiveDate>) {
        let cache = self.api.cache();
        match date {
            Some(date) => {
                let day = date.to_string();
                cache
                    .invalidate_keys(&[
                        keys::fresh_key(CacheKind::Availability, &[place_id, &day]),
                        keys::stale_key(CacheKind::Availability, &[place_id, &day]),
                    ])
                    .await;
            }
            None => {
                cache
                    .invalidate_by_pattern(&format!("availability:{place_id}:*"))
                    .await;
                cache
                    .invalidate_by_pattern(&format!("availability:stale:{place_id}:*"))
                    .await;
            }
        }
    }
}
