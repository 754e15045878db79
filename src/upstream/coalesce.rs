//! Request coalescing and bounded fan-out.
//!
//! `SingleFlight` collapses concurrent fetches sharing a cache key into one
//! underlying operation whose outcome every waiter observes. The fetch runs
//! on its own task, so a waiter that is cancelled never takes the in-flight
//! work down with it -- remaining waiters still see it settle.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::upstream::errors::UpstreamError;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, UpstreamError>>>;

/// Process-local map from cache key to the in-flight fetch for that key.
pub struct SingleFlight<T> {
    in_flight: Arc<DashMap<String, SharedResult<T>>>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Join the in-flight fetch for `key`, or start one. All callers observe
    /// the same outcome, value or error.
    pub async fn run<F>(&self, key: &str, fetch: F) -> Result<T, UpstreamError>
    where
        F: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        if let Some(existing) = self.in_flight.get(key) {
            let shared = existing.clone();
            drop(existing);
            return shared.await;
        }

        let (tx, rx) = oneshot::channel::<Result<T, UpstreamError>>();
        let shared: SharedResult<T> = rx
            .map(|received| match received {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Failure("coalesced fetch was aborted".into())),
            })
            .boxed()
            .shared();

        // A racing caller may have registered between the lookup above and
        // this entry claim; join them instead of double-fetching.
        match self.in_flight.entry(key.to_owned()) {
            Entry::Occupied(occupied) => {
                let existing = occupied.get().clone();
                drop(occupied);
                return existing.await;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(shared.clone());
            }
        }

        let map = Arc::clone(&self.in_flight);
        let owned_key = key.to_owned();
        tokio::spawn(async move {
            let result = fetch.await;
            let _ = tx.send(result);
            map.remove(&owned_key);
        });

        shared.await
    }

    /// Number of fetches currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Run `tasks` with at most `max_concurrency` in flight, returning results
/// in input order. The first failure propagates and no further tasks start.
pub async fn run_concurrent<T, F>(
    tasks: Vec<F>,
    max_concurrency: usize,
) -> Result<Vec<T>, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    stream::iter(tasks)
        .buffered(max_concurrency.max(1))
        .try_collect()
        .await
}
