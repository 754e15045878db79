//! Typed client for the upstream courts-rental API.
//!
//! Every operation follows the same path: circuit breaker -> request
//! coalescer -> fresh-tier read -> rate limiter -> HTTP, writing successful
//! payloads into both cache tiers, with a fresh->stale cache read as the
//! breaker fallback. The upstream is never retried below this layer; the
//! breaker is the retry policy.

pub mod breaker;
pub mod coalesce;
pub mod errors;
mod json;
pub mod limiter;
pub mod models;
mod prefetch;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::{CacheKind, CacheRead, TieredCache, keys};
use crate::config::Config;
use crate::kv::KvMetrics;
use breaker::{BreakerMetrics, CircuitBreaker};
use coalesce::SingleFlight;
use errors::UpstreamError;
use limiter::{FixedWindowLimiter, RateLimitSnapshot};
use models::{Club, Court, Slot};
use prefetch::PrefetchJob;

/// Connect+read budget for one upstream call.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// How much of a 4xx body to carry into the error.
const ERROR_DETAIL_LIMIT: usize = 200;

/// Combined client metrics for the metrics surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamMetrics {
    pub breaker: BreakerMetrics,
    pub kv: KvMetrics,
    pub rate_limit: RateLimitSnapshot,
}

/// Client for the courts-rental upstream. Clone-cheap; all heavy state is
/// shared behind `Arc`s so clones coalesce, rate-limit, and break together.
#[derive(Clone)]
pub struct CourtsApi {
    http: reqwest::Client,
    base_url: Arc<str>,
    cache: TieredCache,
    limiter: Arc<FixedWindowLimiter>,
    breaker: Arc<CircuitBreaker>,
    flights: SingleFlight<Value>,
    prefetch_tx: mpsc::Sender<PrefetchJob>,
}

impl CourtsApi {
    pub fn new(config: &Config, cache: TieredCache) -> Self {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .connect_timeout(UPSTREAM_TIMEOUT)
            .build()
            .expect("failed to build upstream HTTP client");

        let limiter = Arc::new(FixedWindowLimiter::new(
            config.rate_limit,
            Duration::from_millis(config.rate_window_ms),
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_failure_threshold,
            Duration::from_millis(config.breaker_timeout_ms),
            config.breaker_success_threshold,
        ));

        let (prefetch_tx, prefetch_rx) = mpsc::channel(prefetch::QUEUE_CAPACITY);
        let api = Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').into(),
            cache,
            limiter,
            breaker,
            flights: SingleFlight::new(),
            prefetch_tx,
        };
        prefetch::spawn_worker(api.clone(), prefetch_rx);
        api
    }

    /// `GET /clubs?placeId=…`, cached under `clubs:{placeId}`. A fresh
    /// response also records the club->place reverse index and schedules a
    /// background court prefetch for every listed club.
    pub async fn get_clubs(&self, place_id: &str) -> Result<Vec<Club>, UpstreamError> {
        let fresh = keys::fresh_key(CacheKind::Clubs, &[place_id]);
        let stale = keys::stale_key(CacheKind::Clubs, &[place_id]);
        let request = self
            .http
            .get(format!("{}/clubs", self.base_url))
            .query(&[("placeId", place_id)]);
        let value = self
            .cached(CacheKind::Clubs, fresh, stale, request, Some(place_id.to_owned()))
            .await?;
        decode(value)
    }

    /// `GET /clubs/{clubId}/courts`, cached under `courts:{clubId}`.
    pub async fn get_courts(&self, club_id: i64) -> Result<Vec<Court>, UpstreamError> {
        let id = club_id.to_string();
        let fresh = keys::fresh_key(CacheKind::Courts, &[&id]);
        let stale = keys::stale_key(CacheKind::Courts, &[&id]);
        let request = self
            .http
            .get(format!("{}/clubs/{club_id}/courts", self.base_url));
        let value = self
            .cached(CacheKind::Courts, fresh, stale, request, None)
            .await?;
        decode(value)
    }

    /// `GET /clubs/{clubId}/courts/{courtId}/slots?date=…`, cached under
    /// `slots:{clubId}:{courtId}:{yyyy-mm-dd}`.
    pub async fn get_available_slots(
        &self,
        club_id: i64,
        court_id: i64,
        date: chrono::NaiveDate,
    ) -> Result<Vec<Slot>, UpstreamError> {
        let club = club_id.to_string();
        let court = court_id.to_string();
        let day = date.to_string();
        let fresh = keys::fresh_key(CacheKind::Slots, &[&club, &court, &day]);
        let stale = keys::stale_key(CacheKind::Slots, &[&club, &court, &day]);
        let request = self
            .http
            .get(format!(
                "{}/clubs/{club_id}/courts/{court_id}/slots",
                self.base_url
            ))
            .query(&[("date", &day)]);
        let value = self
            .cached(CacheKind::Slots, fresh, stale, request, None)
            .await?;
        decode(value)
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> UpstreamMetrics {
        UpstreamMetrics {
            breaker: self.breaker.metrics(),
            kv: self.cache.metrics(),
            rate_limit: self.limiter.snapshot(),
        }
    }

    /// The shared operation path: coalesced, breaker-guarded fetch with the
    /// tiered cache read as fallback.
    async fn cached(
        &self,
        kind: CacheKind,
        fresh_key: String,
        stale_key: String,
        request: reqwest::RequestBuilder,
        clubs_place: Option<String>,
    ) -> Result<Value, UpstreamError> {
        let primary = {
            let api = self.clone();
            let fresh = fresh_key.clone();
            let stale = stale_key.clone();
            async move {
                let fetch = {
                    let api = api.clone();
                    let fresh = fresh.clone();
                    async move { api.fetch(kind, fresh, stale, request, clubs_place).await }
                };
                api.flights.run(&fresh, fetch).await
            }
        };

        let fallback = move || {
            let cache = self.cache.clone();
            async move {
                let read: CacheRead<Value> = cache
                    .get_with_fallback(&fresh_key, Some(&stale_key))
                    .await;
                match read.data {
                    Some(value) => {
                        if read.is_stale {
                            info!(key = %fresh_key, "serving stale entry while upstream is unavailable");
                        }
                        Ok(value)
                    }
                    None => Err(UpstreamError::NoCachedData { key: fresh_key }),
                }
            }
        };

        self.breaker.execute_with_fallback(primary, fallback).await
    }

    /// One actual upstream round-trip. Runs inside the coalescer's detached
    /// task, so it settles even if every original caller went away.
    async fn fetch(
        &self,
        kind: CacheKind,
        fresh_key: String,
        stale_key: String,
        request: reqwest::RequestBuilder,
        clubs_place: Option<String>,
    ) -> Result<Value, UpstreamError> {
        // Read-through: a live fresh entry short-circuits the upstream and
        // consumes no rate-limit token.
        let cached: CacheRead<Value> = self.cache.get_with_fallback(&fresh_key, None).await;
        if let Some(value) = cached.data {
            return Ok(value);
        }

        self.limiter.acquire().await;

        let response = request
            .send()
            .await
            .map_err(|err| UpstreamError::Failure(format!("request error: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| UpstreamError::Failure(format!("body read error: {err}")))?;

        if status.is_client_error() {
            return Err(UpstreamError::BadStatus {
                status: status.as_u16(),
                detail: truncate(&body, ERROR_DETAIL_LIMIT),
            });
        }
        if !status.is_success() {
            return Err(UpstreamError::Failure(format!(
                "upstream returned {status}"
            )));
        }

        let value: Value = json::parse_json_with_path(&body)
            .map_err(|err| UpstreamError::Failure(format!("undecodable upstream body: {err}")))?;

        self.cache
            .set_with_ttl(&fresh_key, &value, kind, Some(&stale_key))
            .await;

        if let Some(place_id) = clubs_place {
            self.after_fresh_clubs(&value, &place_id).await;
        }

        Ok(value)
    }

    /// Post-processing for a fresh `clubs` payload: reverse-index writes and
    /// prefetch scheduling. Never fails the fetch.
    async fn after_fresh_clubs(&self, value: &Value, place_id: &str) {
        let clubs: Vec<Club> = match serde_json::from_value(value.clone()) {
            Ok(clubs) => clubs,
            Err(err) => {
                warn!(place_id, error = %err, "clubs payload not indexable, skipping prefetch");
                return;
            }
        };
        let club_ids: Vec<i64> = clubs.iter().map(|club| club.id).collect();
        self.cache.remember_club_places(&club_ids, place_id).await;

        if club_ids.is_empty() {
            return;
        }
        let job = PrefetchJob {
            place_id: place_id.to_owned(),
            club_ids,
        };
        if self.prefetch_tx.try_send(job).is_err() {
            warn!(place_id, "court prefetch queue full, dropping job");
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, UpstreamError> {
    serde_json::from_value(value).map_err(|err| UpstreamError::Serialization(err.to_string()))
}

fn truncate(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        body.to_owned()
    } else {
        let mut end = limit;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
