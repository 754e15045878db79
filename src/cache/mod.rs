//! Two-tier cache over the KV store: fresh entries with type-driven TTLs and
//! a longer-lived stale mirror backing the graceful-degradation path.

pub mod keys;
pub mod tiered;

pub use keys::{CacheKind, STALE_TTL};
pub use tiered::{CacheRead, TieredCache};
