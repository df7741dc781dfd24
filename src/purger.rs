//! # Hook Purger
//!
//! Background task that periodically deletes hooks no connection references,
//! e.g. after a provider row cascaded away underneath them.

use std::time::Instant;

use metrics::histogram;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::HookPurgeConfig;
use crate::service::ConnectionService;

pub struct HookPurger {
    service: ConnectionService,
    interval: Duration,
}

impl HookPurger {
    pub fn new(service: ConnectionService, config: &HookPurgeConfig) -> Self {
        Self {
            service,
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    /// Run the purge loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Starting hook purger");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Hook purger shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.tick().await;
                }
            }
        }

        info!("Hook purger stopped");
    }

    /// Execute one purge pass; errors are logged, never propagated.
    pub async fn tick(&self) -> usize {
        let started = Instant::now();
        let purged = match self.service.delete_unreferenced_hooks().await {
            Ok(hooks) => hooks.len(),
            Err(err) => {
                error!(error = %err, "Hook purge tick failed");
                0
            }
        };
        histogram!("vcs_hooks_purge_tick_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        purged
    }
}
