//! Read-through availability aggregator in front of a rate-limited courts
//! rental API.
//!
//! Queries of the form `(placeId, date)` hydrate a clubs -> courts ->
//! available-slots tree through a caching and resilience fabric: a two-tier
//! cache with a stale fallback, a request coalescer, a circuit breaker, a
//! fixed-window rate limiter, and an event-driven invalidation engine.

pub mod app;
pub mod availability;
pub mod cache;
pub mod cli;
pub mod config;
pub mod events;
pub mod kv;
pub mod logging;
pub mod state;
pub mod upstream;
pub mod web;
