//! Error types for the upstream courts-rental client.

/// Failure modes of the cached upstream path.
///
/// Variants are `Clone` because a coalesced fetch shares its outcome --
/// value or error -- with every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// Network error, 5xx, timeout, or an undecodable upstream body.
    #[error("upstream request failed: {0}")]
    Failure(String),

    /// 4xx with a well-formed body. Client-attributable; never retried and
    /// never counted against the circuit breaker.
    #[error("upstream returned {status}: {detail}")]
    BadStatus { status: u16, detail: String },

    /// The breaker is open and the caller supplied no fallback.
    #[error("circuit breaker is open")]
    BreakerOpen,

    /// Fallback was requested but neither a fresh nor a stale entry exists.
    #[error("no cached data for {key}")]
    NoCachedData { key: String },

    /// A cached payload could not be decoded into the expected shape.
    #[error("cached payload could not be decoded: {0}")]
    Serialization(String),
}

impl UpstreamError {
    /// Whether this failure should move the circuit breaker's failure count.
    ///
    /// Only genuine upstream trouble counts; 4xx responses and cache-side
    /// decode problems say nothing about upstream health.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(self, UpstreamError::Failure(_))
    }
}
