//! Polling worker for building deployments

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, error, info};

use crate::deploy::orchestrator::Orchestrator;
use crate::storage::settings::PollerSettings;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Initial delay before first poll
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(5),
        }
    }
}

impl From<&PollerSettings> for Options {
    fn from(settings: &PollerSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs.max(1)),
            initial_delay: Duration::from_secs(settings.initial_delay_secs),
        }
    }
}

/// Run the poller worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &Orchestrator,
    sleep_fn: S,
    mut shutdown_signal: BoxFuture<'static, ()>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Poller worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        debug!("Polling building deployments...");
        match orchestrator.poll_active().await {
            Ok(0) => {}
            Ok(count) => debug!("Polled {} deployments", count),
            Err(e) => error!("Polling failed: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
