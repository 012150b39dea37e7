//! Background eviction of stale limiters.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::registry::Registry;

/// Periodically sweeps a [`Registry`] until told to stop.
pub struct Sweeper {
    registry: Arc<Registry>,
    interval: Duration,
}

impl Sweeper {
    /// Create a sweeper using the registry's configured interval.
    pub fn new(registry: Arc<Registry>) -> Self {
        let interval = registry.eviction().sweep_interval();
        Self { registry, interval }
    }

    /// Override the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep once per interval until `shutdown` resolves.
    ///
    /// The first pass happens one full interval after start.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        // A zero period would make the interval panic.
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = period.as_secs(), "Starting limiter sweeper");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping limiter sweeper");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = self.registry.sweep();
                    debug!(evicted = evicted, "Sweep pass complete");
                }
            }
        }
    }

    /// Run the sweeper on its own task.
    pub fn spawn<F>(self, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run_until(shutdown))
    }
}
