//! Periodic job driver for the backup cycle.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Runs one job on a fixed period until stopped. The first run happens one
/// period after start; ticks missed while a run is in flight are skipped
/// rather than bunched.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn start<F, Fut>(period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of an interval fires immediately; consume it
            // so the first job run lands a full period after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    _ = rx.changed() => break,
                }
            }
            debug!("scheduler stopped");
        });
        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
