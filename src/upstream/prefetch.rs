//! Background court prefetch.
//!
//! A single worker drains a bounded queue of prefetch jobs produced by fresh
//! `clubs` fetches. Fan-out stays at concurrency 2 so prefetch traffic never
//! starves foreground queries; it still shares the foreground limiter and
//! breaker. Everything here is best-effort: failures are logged, a full
//! queue drops the job.

use tokio::sync::mpsc;
use tracing::debug;

use crate::upstream::CourtsApi;
use crate::upstream::coalesce::run_concurrent;

pub(crate) const QUEUE_CAPACITY: usize = 32;
const PREFETCH_CONCURRENCY: usize = 2;

/// Warm the `courts` entries for every club listed under a place.
pub(crate) struct PrefetchJob {
    pub place_id: String,
    pub club_ids: Vec<i64>,
}

pub(crate) fn spawn_worker(api: CourtsApi, mut jobs: mpsc::Receiver<PrefetchJob>) {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            let clubs = job.club_ids.len();
            let tasks: Vec<_> = job
                .club_ids
                .into_iter()
                .map(|club_id| {
                    let api = api.clone();
                    async move {
                        if let Err(err) = api.get_courts(club_id).await {
                            debug!(club_id, error = %err, "court prefetch failed");
                        }
                        Ok(())
                    }
                })
                .collect();
            let _ = run_concurrent::<(), _>(tasks, PREFETCH_CONCURRENCY).await;
            debug!(place_id = %job.place_id, clubs, "court prefetch pass finished");
        }
    });
}
