//! Background liveness probing.
//!
//! One task per provider ticks on a fixed interval, independent of request
//! traffic, and feeds probe outcomes into the same per-provider state the
//! router reads. All tasks share one cancellation token.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::router::ProviderEntry;

pub struct HealthMonitor {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn one probe task per provider. Must be called inside a tokio
    /// runtime. The first probe runs immediately.
    pub(crate) fn spawn(
        providers: &[Arc<ProviderEntry>],
        interval: Duration,
        probe_timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        let token = CancellationToken::new();
        let handles = providers
            .iter()
            .map(|entry| {
                tokio::spawn(probe_loop(
                    Arc::clone(entry),
                    interval,
                    probe_timeout,
                    failure_threshold,
                    token.child_token(),
                ))
            })
            .collect::<Vec<_>>();
        info!(
            providers = handles.len(),
            interval_ms = interval.as_millis() as u64,
            "Health monitor started"
        );
        Self { token, handles }
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.handles.iter().any(|h| !h.is_finished())
    }

    /// Cancel every probe task and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        let handles = std::mem::take(&mut self.handles);
        let count = handles.len();
        futures::future::join_all(handles).await;
        info!(providers = count, "Health monitor stopped");
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn probe_loop(
    entry: Arc<ProviderEntry>,
    interval: Duration,
    probe_timeout: Duration,
    failure_threshold: u32,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = token.cancelled() => break,
            status = entry.probe(probe_timeout, failure_threshold) => {
                debug!(provider = entry.name(), %status, "Probe complete");
            }
        }
    }
    debug!(provider = entry.name(), "Probe task exiting");
}
