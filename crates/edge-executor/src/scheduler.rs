//! Periodic background tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs a job on a fixed interval until shutdown is signalled.
///
/// The first run happens one full interval after start. Runs never
/// overlap: a slow run delays the next tick instead of stacking up.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
}

impl PeriodicTask {
    /// Create a task; `name` appears in log lines.
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self { name, interval }
    }

    /// Interval between runs.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run<F, Fut>(self, shutdown: CancellationToken, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        info!(
            task = self.name,
            interval_secs = self.interval.as_secs_f64(),
            "periodic task starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(task = self.name, "periodic task shutting down");
                    break;
                }

                _ = interval.tick() => {
                    debug!(task = self.name, "periodic task tick");
                    job().await;
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn<F, Fut>(self, shutdown: CancellationToken, job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run(shutdown, job))
    }
}
