//! Key-value store adapter over Redis, with an in-memory backend for tests
//! and local development.
//!
//! Every operation is total: network and backend errors are swallowed into
//! `None`/`false` and counted, so callers never handle transport failures.
//! The adapter keeps `hits`/`misses`/`errors`/`operations` counters and a
//! liveness flag reflecting the last observed backend state.

use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Reconnection backoff: 1 s initial, doubling, capped at 5 attempts, then a
/// cool-off before the next connection attempt is allowed.
const RECONNECT_INITIAL_MS: u64 = 1000;
const RECONNECT_EXPONENT_BASE: u64 = 2;
const RECONNECT_ATTEMPTS: usize = 5;
const RECONNECT_COOL_OFF: Duration = Duration::from_secs(30);

/// Per-command timeouts so a wedged backend degrades instead of hanging.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Snapshot of the adapter's counters for the metrics surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KvMetrics {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub operations: u64,
    pub hit_rate: f64,
    pub connected: bool,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    operations: AtomicU64,
}

struct RedisBackend {
    client: redis::Client,
    /// Shared manager handle; `ConnectionManager` is clone-cheap and
    /// reconnects internally with the configured backoff.
    conn: Mutex<Option<ConnectionManager>>,
    /// Cool-off bookkeeping for re-establishing a manager after the initial
    /// connection (or a later teardown) failed outright.
    last_attempt: StdMutex<Option<std::time::Instant>>,
}

struct MemoryEntry {
    value: String,
    expires_at: Option<tokio::time::Instant>,
}

#[derive(Default)]
struct MemoryBackend {
    map: StdMutex<HashMap<String, MemoryEntry>>,
}

enum Backend {
    Redis(RedisBackend),
    Memory(MemoryBackend),
}

/// Thin transport over the external key/value service.
pub struct KvStore {
    backend: Backend,
    counters: Counters,
    connected: AtomicBool,
}

impl KvStore {
    /// Connect to Redis using the configured host/port/password/db. A failed
    /// initial connection is non-fatal: the store starts disconnected and
    /// retries lazily with a cool-off.
    pub async fn connect(config: &Config) -> Self {
        let auth = config
            .kv_password
            .as_deref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        let url = format!(
            "redis://{auth}{}:{}/{}",
            config.kv_host, config.kv_port, config.kv_db
        );

        let client = redis::Client::open(url.as_str()).unwrap_or_else(|e| {
            panic!(
                "invalid KV connection parameters ({}:{}): {e}",
                config.kv_host, config.kv_port
            )
        });

        let store = Self {
            backend: Backend::Redis(RedisBackend {
                client,
                conn: Mutex::new(None),
                last_attempt: StdMutex::new(None),
            }),
            counters: Counters::default(),
            connected: AtomicBool::new(false),
        };

        if store.manager().await.is_some() {
            info!(
                host = %config.kv_host,
                port = config.kv_port,
                db = config.kv_db,
                "KV store connected"
            );
        } else {
            warn!(
                host = %config.kv_host,
                port = config.kv_port,
                "KV store unreachable at startup, continuing degraded"
            );
        }
        store
    }

    /// In-memory store honoring the same contract (TTL expiry, pattern scan,
    /// counters). Used by tests and local development.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryBackend::default()),
            counters: Counters::default(),
            connected: AtomicBool::new(true),
        }
    }

    /// Retrieve a value by key, or `None` if absent, expired, or the backend
    /// errored.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let value = match &self.backend {
            Backend::Memory(m) => m.get(key),
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return self.miss();
                };
                match conn.get::<_, Option<String>>(key).await {
                    Ok(v) => {
                        self.mark_alive();
                        v
                    }
                    Err(err) => {
                        self.note_error("GET", key, &err);
                        None
                    }
                }
            }
        };
        match value {
            Some(v) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => self.miss(),
        }
    }

    /// Set a key with a TTL in seconds. Returns `false` when the backend
    /// refused or errored.
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> bool {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        match &self.backend {
            Backend::Memory(m) => {
                m.set(key, value, Some(ttl_seconds));
                true
            }
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return false;
                };
                match conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await {
                    Ok(()) => {
                        self.mark_alive();
                        true
                    }
                    Err(err) => {
                        self.note_error("SETEX", key, &err);
                        false
                    }
                }
            }
        }
    }

    /// Fetch many keys at once, preserving input order. Backend errors
    /// degrade to all-absent.
    pub async fn mget(&self, keys: &[String]) -> Vec<Option<String>> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        if keys.is_empty() {
            return Vec::new();
        }
        let values = match &self.backend {
            Backend::Memory(m) => keys.iter().map(|k| m.get(k)).collect(),
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return vec![None; keys.len()];
                };
                match conn.mget::<_, Vec<Option<String>>>(keys).await {
                    Ok(values) => {
                        self.mark_alive();
                        values
                    }
                    Err(err) => {
                        self.note_error("MGET", &keys.join(","), &err);
                        vec![None; keys.len()]
                    }
                }
            }
        };
        for v in &values {
            if v.is_some() {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        values
    }

    /// Set many keys at once, without TTLs.
    pub async fn mset(&self, pairs: &[(String, String)]) -> bool {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        if pairs.is_empty() {
            return true;
        }
        match &self.backend {
            Backend::Memory(m) => {
                for (k, v) in pairs {
                    m.set(k, v, None);
                }
                true
            }
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return false;
                };
                match conn.mset::<_, _, ()>(pairs).await {
                    Ok(()) => {
                        self.mark_alive();
                        true
                    }
                    Err(err) => {
                        self.note_error("MSET", "(multiple)", &err);
                        false
                    }
                }
            }
        }
    }

    /// Delete a key. Returns `true` when the operation ran without a backend
    /// error, whether or not the key existed.
    pub async fn del(&self, key: &str) -> bool {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        match &self.backend {
            Backend::Memory(m) => {
                m.del(key);
                true
            }
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return false;
                };
                match conn.del::<_, usize>(key).await {
                    Ok(_) => {
                        self.mark_alive();
                        true
                    }
                    Err(err) => {
                        self.note_error("DEL", key, &err);
                        false
                    }
                }
            }
        }
    }

    /// Delete many keys, returning how many existed.
    pub async fn del_many(&self, keys: &[String]) -> usize {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        if keys.is_empty() {
            return 0;
        }
        match &self.backend {
            Backend::Memory(m) => keys.iter().filter(|k| m.del(k)).count(),
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return 0;
                };
                match conn.del::<_, usize>(keys).await {
                    Ok(removed) => {
                        self.mark_alive();
                        removed
                    }
                    Err(err) => {
                        self.note_error("DEL", &keys.join(","), &err);
                        0
                    }
                }
            }
        }
    }

    /// Enumerate keys matching a glob pattern with a non-blocking cursor
    /// walk (`SCAN MATCH`), never `KEYS`.
    pub async fn scan_keys(&self, pattern: &str) -> Vec<String> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        match &self.backend {
            Backend::Memory(m) => m.scan(pattern),
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return Vec::new();
                };
                let mut keys = Vec::new();
                match conn.scan_match::<_, String>(pattern).await {
                    Ok(mut iter) => {
                        while let Some(key) = iter.next_item().await {
                            keys.push(key);
                        }
                        self.mark_alive();
                    }
                    Err(err) => self.note_error("SCAN", pattern, &err),
                }
                keys
            }
        }
    }

    /// Drop every key in the current database.
    pub async fn flush(&self) -> bool {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        match &self.backend {
            Backend::Memory(m) => {
                m.map.lock().unwrap().clear();
                true
            }
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return false;
                };
                match redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await {
                    Ok(()) => {
                        self.mark_alive();
                        true
                    }
                    Err(err) => {
                        self.note_error("FLUSHDB", "", &err);
                        false
                    }
                }
            }
        }
    }

    /// Last observed backend liveness.
    pub fn healthy(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Active liveness probe; refreshes `healthy()`.
    pub async fn ping(&self) -> bool {
        match &self.backend {
            Backend::Memory(_) => true,
            Backend::Redis(_) => {
                let Some(mut conn) = self.manager().await else {
                    return false;
                };
                match redis::cmd("PING").query_async::<String>(&mut conn).await {
                    Ok(_) => {
                        self.mark_alive();
                        true
                    }
                    Err(err) => {
                        self.note_error("PING", "", &err);
                        false
                    }
                }
            }
        }
    }

    /// Count a decode failure discovered above the transport (a cached
    /// payload that would not deserialize).
    pub(crate) fn note_decode_error(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> KvMetrics {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        KvMetrics {
            hits,
            misses,
            errors: self.counters.errors.load(Ordering::Relaxed),
            operations: self.counters.operations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            connected: self.healthy(),
        }
    }

    fn miss(&self) -> Option<String> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn mark_alive(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    fn note_error(&self, command: &str, key: &str, err: &redis::RedisError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        warn!(command, key, error = %err, "KV operation failed");
    }

    /// A clone of the shared connection manager, establishing one if needed.
    /// Returns `None` (and counts an error) while disconnected and inside
    /// the reconnect cool-off.
    async fn manager(&self) -> Option<ConnectionManager> {
        let Backend::Redis(redis) = &self.backend else {
            return None;
        };

        if let Some(conn) = redis.conn.lock().await.clone() {
            return Some(conn);
        }

        // Cool-off gate so a dead backend is not re-dialed on every call.
        {
            let mut last = redis.last_attempt.lock().unwrap();
            if let Some(at) = *last
                && at.elapsed() < RECONNECT_COOL_OFF
            {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            *last = Some(std::time::Instant::now());
        }

        let manager_config = ConnectionManagerConfig::new()
            .set_factor(RECONNECT_INITIAL_MS)
            .set_exponent_base(RECONNECT_EXPONENT_BASE)
            .set_number_of_retries(RECONNECT_ATTEMPTS)
            .set_connection_timeout(COMMAND_TIMEOUT)
            .set_response_timeout(COMMAND_TIMEOUT);

        match ConnectionManager::new_with_config(redis.client.clone(), manager_config).await {
            Ok(conn) => {
                debug!("KV connection established");
                self.mark_alive();
                *redis.conn.lock().await = Some(conn.clone());
                Some(conn)
            }
            Err(err) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.connected.store(false, Ordering::Relaxed);
                warn!(error = %err, "KV connection attempt failed");
                None
            }
        }
    }
}

impl MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        let mut map = self.map.lock().unwrap();
        let entry = map.get(key)?;
        if let Some(at) = entry.expires_at
            && at <= tokio::time::Instant::now()
        {
            map.remove(key);
            return None;
        }
        map.get(key).map(|e| e.value.clone())
    }

    fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) {
        let expires_at =
            ttl_seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
        self.map.lock().unwrap().insert(
            key.to_owned(),
            MemoryEntry {
                value: value.to_owned(),
                expires_at,
            },
        );
    }

    fn del(&self, key: &str) -> bool {
        self.map.lock().unwrap().remove(key).is_some()
    }

    fn scan(&self, pattern: &str) -> Vec<String> {
        let now = tokio::time::Instant::now();
        self.map
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_none_or(|at| at > now))
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Match a key against a Redis-style glob pattern (`*` wildcards only, which
/// is all the cache key schema uses).
fn glob_match(pattern: &str, candidate: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == candidate;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            if !candidate.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            return part.is_empty()
                || (candidate.len() >= pos + part.len() && candidate[pos..].ends_with(part));
        } else if !part.is_empty() {
            match candidate[pos..].find(part) {
                Some(idx) => pos += idx + part.len(),
                None => return false,
            }
        }
    }
    true
}
