//! Background dispatch worker.
//!
//! Continuously polls for due deliveries, claims them atomically, and
//! executes them with bounded concurrency. Decoupled from the requests that
//! enqueue events: a slow subscriber never stalls lifecycle operations or
//! other subscribers' deliveries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{error, info};

use crate::delivery::DeliveryService;
use simfleet_db::models::WebhookDelivery;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of deliveries processed concurrently.
    pub concurrency: usize,
    /// How often to poll for due deliveries (in milliseconds).
    pub poll_interval_ms: u64,
    /// Maximum deliveries claimed per poll.
    pub batch_size: i64,
    /// Claim lease duration; claims older than this are considered stale.
    pub lease_secs: i64,
    /// How often to release stale claims (in seconds).
    pub stale_release_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
            batch_size: 20,
            lease_secs: 60,
            stale_release_interval_secs: 300,
        }
    }
}

impl WorkerConfig {
    /// Read overrides from `SIMFLEET_WORKER_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parse("SIMFLEET_WORKER_CONCURRENCY", defaults.concurrency),
            poll_interval_ms: env_parse("SIMFLEET_WORKER_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            batch_size: env_parse("SIMFLEET_WORKER_BATCH_SIZE", defaults.batch_size),
            lease_secs: env_parse("SIMFLEET_WORKER_LEASE_SECS", defaults.lease_secs),
            stale_release_interval_secs: env_parse(
                "SIMFLEET_WORKER_STALE_RELEASE_SECS",
                defaults.stale_release_interval_secs,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Webhook dispatch worker pool.
pub struct DispatchWorker {
    service: Arc<DeliveryService>,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl DispatchWorker {
    #[must_use]
    pub fn new(service: Arc<DeliveryService>, config: WorkerConfig) -> Self {
        Self {
            service,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the poll loop until shutdown is requested.
    pub async fn run(&self) {
        info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Starting webhook dispatch worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut stale_interval =
            interval(Duration::from_secs(self.config.stale_release_interval_secs));

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        info!("Worker shutdown requested, stopping poll loop");
                        break;
                    }
                    self.poll_and_process(&semaphore).await;
                }
                _ = stale_interval.tick() => {
                    self.release_stale_claims().await;
                }
            }
        }

        // Drain in-flight deliveries before returning.
        info!("Waiting for in-flight deliveries to complete...");
        let _ = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!("Worker stopped");
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Claim a batch of due deliveries and process them concurrently.
    async fn poll_and_process(&self, semaphore: &Arc<Semaphore>) {
        let deliveries = match WebhookDelivery::claim_due(
            self.service.pool(),
            self.config.batch_size,
            self.config.lease_secs,
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to claim due deliveries");
                return;
            }
        };

        for delivery in deliveries {
            let permit = match Arc::clone(semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => return, // semaphore closed, shutting down
            };
            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                service.process_delivery(&delivery).await;
                drop(permit);
            });
        }
    }

    /// Recover deliveries whose worker died mid-claim.
    async fn release_stale_claims(&self) {
        match WebhookDelivery::release_stale_claims(self.service.pool(), self.config.lease_secs)
            .await
        {
            Ok(released) if released > 0 => {
                info!(released, "Released stale delivery claims");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to release stale delivery claims");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.lease_secs > 0);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("SIMFLEET_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse("SIMFLEET_TEST_GARBAGE", 7usize), 7);
        assert_eq!(env_parse("SIMFLEET_TEST_UNSET", 9usize), 9);
        std::env::remove_var("SIMFLEET_TEST_GARBAGE");
    }
}
