//! Background folding of device-wide counters into smoothed rates.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::counters::{DecayWeights, DeviceCounters};
use super::permit::Permit;
use crate::config::LimitsConfig;

/// Default sampling interval of the tracker.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single background task updating a [`DeviceCounters`] aggregate.
///
/// The task is started at most once at a time: concurrent [`RateTracker::start`]
/// calls race on one lock and only the first spawns it.
pub struct RateTracker {
    counters: Arc<DeviceCounters>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl RateTracker {
    /// Create a stopped tracker sampling every [`DEFAULT_UPDATE_INTERVAL`].
    pub fn new(counters: Arc<DeviceCounters>) -> Self {
        Self::with_interval(counters, DEFAULT_UPDATE_INTERVAL)
    }

    /// Create a stopped tracker with a custom interval.
    pub fn with_interval(counters: Arc<DeviceCounters>, interval: Duration) -> Self {
        Self {
            counters,
            interval,
            worker: Mutex::new(None),
        }
    }

    /// The aggregate updated by this tracker.
    pub fn counters(&self) -> &Arc<DeviceCounters> {
        &self.counters
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the background task. Returns `true` only for the call that spawned it.
    ///
    /// Must be called from within a tokio runtime; outside of one the tracker
    /// stays stopped and a warning is logged.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "No async runtime, rate tracker not started");
                return false;
            }
        };

        let token = CancellationToken::new();
        let handle = runtime.spawn(run(
            Arc::clone(&self.counters),
            self.interval,
            token.clone(),
        ));
        *worker = Some(Worker { token, handle });
        info!(interval = ?self.interval, "Rate tracker started");
        true
    }

    /// Stop the background task and wait for it to exit.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        worker.token.cancel();
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "Rate tracker task failed");
        }
        info!("Rate tracker stopped");
    }

    /// Returns whether the background task is running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Create a permit accounting into this tracker's aggregate, starting the
    /// tracker first if needed.
    pub fn permit(&self, limits: LimitsConfig) -> Permit {
        self.start();
        Permit::new(limits, Arc::clone(&self.counters))
    }
}

impl Drop for RateTracker {
    fn drop(&mut self) {
        let worker = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = worker.as_ref() {
            worker.token.cancel();
        }
    }
}

impl std::fmt::Debug for RateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateTracker")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run(counters: Arc<DeviceCounters>, interval: Duration, token: CancellationToken) {
    let weights = DecayWeights::for_interval(interval);
    let mut last = {
        let guard = counters.lock();
        (guard.tx_bytes(), guard.rx_bytes())
    };

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Rate tracker received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let snapshot = {
            let mut guard = counters.lock();
            last = guard.fold(last, interval, &weights);
            guard.snapshot()
        };

        trace!(
            period = snapshot.period,
            tx_1m = snapshot.tx_avg.one,
            tx_5m = snapshot.tx_avg.five,
            tx_15m = snapshot.tx_avg.fifteen,
            rx_1m = snapshot.rx_avg.one,
            rx_5m = snapshot.rx_avg.five,
            rx_15m = snapshot.rx_avg.fifteen,
            "Folded counters"
        );
    }
}
