//! Application wiring: configuration, KV store, cache fabric, upstream
//! client, planner, invalidation engine, and the web service.

use anyhow::Context;
use figment::{Figment, providers::Env};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::availability::AvailabilityPlanner;
use crate::cache::TieredCache;
use crate::config::Config;
use crate::events::Invalidator;
use crate::kv::KvStore;
use crate::state::AppState;
use crate::upstream::CourtsApi;
use crate::web::WebService;

/// Main application struct holding the wired component graph.
pub struct App {
    config: Config,
    state: AppState,
}

impl App {
    /// Create a new App instance with all components initialized. A KV store
    /// that is unreachable at startup is non-fatal: the service starts
    /// degraded and the adapter reconnects lazily.
    pub async fn new() -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw())
            .extract()
            .context("Failed to load config")?;

        let kv = Arc::new(KvStore::connect(&config).await);
        let cache = TieredCache::new(kv.clone());

        let api = CourtsApi::new(&config, cache.clone());
        let planner =
            AvailabilityPlanner::new(api.clone(), config.fan_out_courts, config.fan_out_slots);
        let invalidator = Arc::new(Invalidator::new(
            cache,
            config.prefetch_place_ids.clone(),
            config.upstream_utc_offset_minutes,
        ));

        info!(
            upstream = %config.upstream_base_url,
            rate_limit = config.rate_limit,
            rate_window_ms = config.rate_window_ms,
            fan_out_courts = config.fan_out_courts,
            fan_out_slots = config.fan_out_slots,
            sweep_places = config.prefetch_place_ids.len(),
            "availability fabric configured"
        );

        Ok(App {
            state: AppState {
                api,
                planner,
                invalidator,
                kv,
            },
            config,
        })
    }

    /// Serve HTTP until a shutdown signal arrives.
    pub async fn run(self) -> ExitCode {
        let web = WebService::new(self.config.port, self.state);
        match web.serve().await {
            Ok(()) => {
                info!("shutdown complete");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!(error = ?err, "web service failed");
                ExitCode::FAILURE
            }
        }
    }
}
