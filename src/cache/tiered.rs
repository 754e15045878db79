//! The two-tier read/write surface owning every cache entry.
//!
//! Writes land in the fresh tier with the type's TTL and are mirrored into
//! the stale tier with `STALE_TTL`, so a stale copy outlives freshness and
//! can be served while the upstream is unhealthy. Reads fall back fresh ->
//! stale -> miss and never surface transport errors.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::keys::{self, CacheKind, STALE_TTL};
use crate::kv::{KvMetrics, KvStore};

/// Result of a tiered read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    pub data: Option<T>,
    pub is_stale: bool,
}

impl<T> CacheRead<T> {
    fn miss() -> Self {
        Self {
            data: None,
            is_stale: false,
        }
    }
}

/// Exclusive owner of the cache keyspace. The upstream client and the
/// invalidation engine mutate entries only through this type.
#[derive(Clone)]
pub struct TieredCache {
    kv: Arc<KvStore>,
}

impl TieredCache {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Read the fresh entry, falling back to the stale mirror. An entry that
    /// no longer decodes is treated as a miss and discarded.
    pub async fn get_with_fallback<T: DeserializeOwned>(
        &self,
        fresh_key: &str,
        stale_key: Option<&str>,
    ) -> CacheRead<T> {
        if let Some(raw) = self.kv.get(fresh_key).await {
            match serde_json::from_str(&raw) {
                Ok(data) => {
                    return CacheRead {
                        data: Some(data),
                        is_stale: false,
                    };
                }
                Err(err) => self.discard_undecodable(fresh_key, &err).await,
            }
        }

        if let Some(stale_key) = stale_key
            && let Some(raw) = self.kv.get(stale_key).await
        {
            match serde_json::from_str(&raw) {
                Ok(data) => {
                    debug!(key = fresh_key, "serving stale cache entry");
                    return CacheRead {
                        data: Some(data),
                        is_stale: true,
                    };
                }
                Err(err) => self.discard_undecodable(stale_key, &err).await,
            }
        }

        CacheRead::miss()
    }

    /// Serialize `value` and write it to the fresh tier with the type's TTL,
    /// mirroring into the stale tier iff a stale key is given.
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        fresh_key: &str,
        value: &T,
        kind: CacheKind,
        stale_key: Option<&str>,
    ) -> bool {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                self.kv.note_decode_error();
                warn!(key = fresh_key, error = %err, "cache payload failed to serialize");
                return false;
            }
        };

        let mut ok = self.kv.set(fresh_key, &payload, kind.ttl()).await;
        if let Some(stale_key) = stale_key {
            ok &= self.kv.set(stale_key, &payload, STALE_TTL).await;
        }
        ok
    }

    /// Delete literal keys. Returns `true` when every delete ran without a
    /// backend error (the keys need not have existed).
    pub async fn invalidate_keys(&self, keys: &[String]) -> bool {
        let mut ok = true;
        for key in keys {
            ok &= self.kv.del(key).await;
        }
        ok
    }

    /// Delete every key matching a pattern (`<type>:<p1>:*` or a literal
    /// key). A pattern with no matches is a no-op. Returns the number of
    /// keys removed.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        if !pattern.contains('*') {
            return self.kv.del_many(&[pattern.to_owned()]).await;
        }
        let matched = self.kv.scan_keys(pattern).await;
        if matched.is_empty() {
            return 0;
        }
        let removed = self.kv.del_many(&matched).await;
        debug!(pattern, removed, "invalidated cache entries by pattern");
        removed
    }

    /// Record `clubToPlace:{id} = place_id` for every club in a fresh
    /// `clubs` response. TTL matches the stale tier so the mapping lives at
    /// least as long as any clubs entry.
    pub async fn remember_club_places(&self, club_ids: &[i64], place_id: &str) {
        for &club_id in club_ids {
            self.kv
                .set(&keys::club_to_place_key(club_id), place_id, STALE_TTL)
                .await;
        }
    }

    /// Resolve a club back to the place it was listed under, if the reverse
    /// index still holds it.
    pub async fn club_place(&self, club_id: i64) -> Option<String> {
        self.kv.get(&keys::club_to_place_key(club_id)).await
    }

    pub fn metrics(&self) -> KvMetrics {
        self.kv.metrics()
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    async fn discard_undecodable(&self, key: &str, err: &serde_json::Error) {
        self.kv.note_decode_error();
        warn!(key, error = %err, "discarding undecodable cache entry");
        self.kv.del(key).await;
    }
}
