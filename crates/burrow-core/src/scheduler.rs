//! Fixed-interval trigger for reconciliation.

use crate::cancel::CancellationToken;
use crate::supervisor::Supervisor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Run `callback` once per `period` until `token` is cancelled.
///
/// The first run happens one full period after registration. A slow callback
/// delays the following tick instead of triggering a burst of catch-up runs.
pub fn on_interval<F, Fut>(
    period: Duration,
    token: CancellationToken,
    mut callback: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => callback().await,
            }
        }
        debug!("Interval loop stopped");
    })
}

/// Drives [`Supervisor::sync_status`] on a fixed cadence.
pub struct ReconciliationScheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReconciliationScheduler {
    /// Register `sync_status` to run every `period`.
    pub fn start(supervisor: Arc<Supervisor>, period: Duration) -> Self {
        let token = CancellationToken::new();
        info!("Reconciling tunnels every {:?}", period);

        let handle = on_interval(period, token.clone(), move || {
            let supervisor = Arc::clone(&supervisor);
            async move {
                match supervisor.sync_status().await {
                    Ok(Some(report)) if !report.is_noop() => info!(
                        "Reconciled tunnels: started {:?}, stopped {:?}, failed {}",
                        report.started,
                        report.stopped,
                        report.failed.len()
                    ),
                    Ok(_) => {}
                    Err(e) if e.is_transient() => warn!("Reconciliation skipped this tick: {}", e),
                    Err(e) => error!("Reconciliation failed: {}", e),
                }
            }
        });

        Self { token, handle }
    }

    /// Stop ticking and wait for an in-flight tick to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("Reconciliation task ended abnormally: {}", e);
        }
    }
}
