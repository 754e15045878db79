//! Environment-driven configuration, extracted with figment.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // KV store connection
    #[serde(default = "default_kv_host")]
    pub kv_host: String,
    #[serde(default = "default_kv_port")]
    pub kv_port: u16,
    #[serde(default)]
    pub kv_password: Option<String>,
    #[serde(default)]
    pub kv_db: i64,

    /// Base URL of the upstream courts-rental API.
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,

    // Upstream quota: at most `rate_limit` calls per `rate_window_ms`.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,

    // Circuit breaker tuning.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_timeout_ms")]
    pub breaker_timeout_ms: u64,
    #[serde(default = "default_breaker_success_threshold")]
    pub breaker_success_threshold: u32,

    /// Reserved grouping delay for the coalescer; carried but unused.
    #[serde(default = "default_coalesce_batch_delay_ms")]
    pub coalesce_batch_delay_ms: u64,

    // Per-level fan-out of the availability planner.
    #[serde(default = "default_fan_out_courts")]
    pub fan_out_courts: usize,
    #[serde(default = "default_fan_out_slots")]
    pub fan_out_slots: usize,

    /// Places whose composite availability entries are invalidated on every
    /// ingested event. Comma-separated in the environment.
    #[serde(default, deserialize_with = "de_comma_list")]
    pub prefetch_place_ids: Vec<String>,

    /// Fixed offset applied when deriving a slot's calendar day (0 = UTC).
    #[serde(default)]
    pub upstream_utc_offset_minutes: i32,

    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_kv_host() -> String {
    "localhost".to_owned()
}
fn default_kv_port() -> u16 {
    6379
}
fn default_upstream_base_url() -> String {
    "http://localhost:4000".to_owned()
}
fn default_rate_limit() -> u32 {
    60
}
fn default_rate_window_ms() -> u64 {
    60_000
}
fn default_breaker_failure_threshold() -> u32 {
    5
}
fn default_breaker_timeout_ms() -> u64 {
    60_000
}
fn default_breaker_success_threshold() -> u32 {
    3
}
fn default_coalesce_batch_delay_ms() -> u64 {
    50
}
fn default_fan_out_courts() -> usize {
    5
}
fn default_fan_out_slots() -> usize {
    10
}
fn default_port() -> u16 {
    3000
}
fn default_log_level() -> String {
    "info".to_owned()
}

/// Accept either a real list or a comma-separated string (the usual shape
/// of an environment variable).
fn de_comma_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Csv(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect(),
    })
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("defaults are total")
    }
}
