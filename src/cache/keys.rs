//! Cache key schema and per-type freshness bounds.
//!
//! Two parallel key spaces: `<type>:<p1>:<p2>:…` for fresh entries and
//! `<type>:stale:<p1>:<p2>:…` for their longer-lived stale mirrors.

/// Stale-tier TTL, seconds. Longer than every fresh TTL so a stale mirror
/// can outlive its fresh counterpart.
pub const STALE_TTL: u64 = 7200;

/// Entry types with their fresh-tier TTLs. Freshness tightens with
/// volatility: club metadata is near-static, slots are the liveness surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Clubs,
    Courts,
    Slots,
    /// Reserved for composite availability entries; invalidated by the event
    /// engine even though nothing writes it yet.
    Availability,
}

impl CacheKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::Clubs => "clubs",
            CacheKind::Courts => "courts",
            CacheKind::Slots => "slots",
            CacheKind::Availability => "availability",
        }
    }

    /// Fresh-tier TTL in seconds.
    pub fn ttl(self) -> u64 {
        match self {
            CacheKind::Clubs => 3600,
            CacheKind::Courts => 1800,
            CacheKind::Slots => 300,
            CacheKind::Availability => 180,
        }
    }
}

/// `<type>:<p1>:<p2>:…`
pub fn fresh_key(kind: CacheKind, params: &[&str]) -> String {
    let mut key = kind.as_str().to_owned();
    for p in params {
        key.push(':');
        key.push_str(p);
    }
    key
}

/// `<type>:stale:<p1>:<p2>:…`
pub fn stale_key(kind: CacheKind, params: &[&str]) -> String {
    let mut key = kind.as_str().to_owned();
    key.push_str(":stale");
    for p in params {
        key.push(':');
        key.push_str(p);
    }
    key
}

/// Reverse index from a club to the place it was listed under. Written on
/// every fresh `clubs` fetch so `club_updated` invalidation can scope the
/// `clubs` entry to one place instead of sweeping the keyspace.
pub fn club_to_place_key(club_id: i64) -> String {
    format!("clubToPlace:{club_id}")
}
