use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{AccrualOutcome, AccrualSource};
use crate::ledger::models::AccrualUpdate;
use crate::ledger::LedgerStore;

/// Single-slot pending-work indicator shared by the submission path and the
/// reconciler.
///
/// `Notify::notify_one` stores at most one permit, so any number of signals
/// raised before the loop next waits collapse into a single pass, and a
/// signal raised while a pass is running is kept for exactly one more.
#[derive(Debug, Default)]
pub struct ReconcileSignal {
    notify: Notify,
}

impl ReconcileSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hint that work may be available. Never blocks.
    pub fn signal(&self) {
        self.notify.notify_one();
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Reconciler timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Wait before re-polling orders the authority has not decided yet
    pub poll_interval: Duration,
    /// First back-off step after a faulty pass
    pub base_delay: Duration,
    /// Upper bound for any wait, `Retry-After` included
    pub max_delay: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

impl ReconcileConfig {
    /// How long to wait before self-signalling after `report`, or `None`
    /// when nothing is left to chase.
    ///
    /// `consecutive_faulty` counts faulty passes in a row, this one included.
    pub fn delay_after(&self, report: &PassReport, consecutive_faulty: u32) -> Option<Duration> {
        if !report.has_remaining_work() {
            return None;
        }
        if report.faults() > 0 {
            let exponent = consecutive_faulty.saturating_sub(1).min(20);
            let mut delay = self.base_delay.saturating_mul(1u32 << exponent);
            if let Some(retry_after) = report.retry_after {
                delay = delay.max(retry_after);
            }
            Some(delay.min(self.max_delay))
        } else {
            Some(self.poll_interval.min(self.max_delay))
        }
    }
}

/// What one pass over the live backlog did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub attempted: usize,
    pub finalized: usize,
    pub pending: usize,
    pub rate_limited: usize,
    pub server_faults: usize,
    pub transport_errors: usize,
    pub store_errors: usize,
    /// Longest `Retry-After` seen during the pass
    pub retry_after: Option<Duration>,
}

impl PassReport {
    pub fn faults(&self) -> usize {
        self.rate_limited + self.server_faults + self.transport_errors + self.store_errors
    }

    pub fn has_remaining_work(&self) -> bool {
        self.pending > 0 || self.faults() > 0
    }
}

/// The accrual reconciliation loop: one background worker that, on signal,
/// walks every NEW/PROCESSING order, asks the authority about each in turn
/// and writes verdicts back to the ledger.
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    source: Arc<dyn AccrualSource>,
    signal: Arc<ReconcileSignal>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        source: Arc<dyn AccrualSource>,
        signal: Arc<ReconcileSignal>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            source,
            signal,
            config,
        }
    }

    /// Spawn the worker and kick off a first pass for whatever backlog a
    /// previous process left behind.
    pub fn start(self) -> ReconcilerHandle {
        let signal = self.signal.clone();
        let shutdown = CancellationToken::new();
        let join = tokio::spawn(self.run(shutdown.clone()));

        signal.signal();
        info!("Accrual reconciler started");

        ReconcilerHandle { shutdown, join }
    }

    /// Worker body. Returns once `shutdown` is cancelled; a pass that is
    /// already running is allowed to finish first.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut consecutive_faulty: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.signal.notified() => {}
            }

            let report = self.run_pass().await;
            log_pass(&report);

            if report.faults() > 0 {
                consecutive_faulty = consecutive_faulty.saturating_add(1);
            } else {
                consecutive_faulty = 0;
            }

            let Some(delay) = self.config.delay_after(&report, consecutive_faulty) else {
                continue;
            };
            debug!("Next reconciliation pass in {:?}", delay);

            // A poll wait yields to new work; a fault back-off does not.
            let wake_on_signal = report.faults() == 0;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.signal.notified(), if wake_on_signal => self.signal.signal(),
                _ = tokio::time::sleep(delay) => self.signal.signal(),
            }
        }

        info!("Accrual reconciler stopped");
    }

    /// One full pass over the live backlog. Orders are queried one at a
    /// time; no outcome aborts the pass.
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::default();

        let numbers = match self.store.live_orders().await {
            Ok(numbers) => numbers,
            Err(e) => {
                warn!("Could not load live orders: {}", e);
                report.store_errors += 1;
                return report;
            }
        };

        for number in numbers {
            report.attempted += 1;

            let update = match self.source.query(number).await {
                AccrualOutcome::Final(update) => update,
                AccrualOutcome::Pending => AccrualUpdate::processing(),
                AccrualOutcome::RateLimited { retry_after } => {
                    debug!("Authority rate-limited query for order {}", number);
                    report.rate_limited += 1;
                    report.retry_after = report.retry_after.max(retry_after);
                    continue;
                }
                AccrualOutcome::ServerFault { status } => {
                    debug!("Authority returned {} for order {}", status, number);
                    report.server_faults += 1;
                    continue;
                }
                AccrualOutcome::TransportError(reason) => {
                    debug!("Query for order {} failed: {}", number, reason);
                    report.transport_errors += 1;
                    continue;
                }
            };

            match self.store.apply_accrual(number, update).await {
                Ok(changed) if update.status.is_terminal() => {
                    if changed {
                        info!("Order {} settled as {}", number, update.status);
                    }
                    report.finalized += 1;
                }
                Ok(_) => report.pending += 1,
                Err(e) => {
                    warn!("Could not record {} for order {}: {}", update.status, number, e);
                    report.store_errors += 1;
                }
            }
        }

        report
    }
}

fn log_pass(report: &PassReport) {
    if report.attempted == 0 && report.faults() == 0 {
        debug!("Reconciliation pass found no live orders");
        return;
    }
    if report.faults() > 0 {
        warn!(
            "Reconciliation pass: {} attempted, {} finalized, {} pending, {} rate-limited, {} server faults, {} transport errors, {} store errors",
            report.attempted,
            report.finalized,
            report.pending,
            report.rate_limited,
            report.server_faults,
            report.transport_errors,
            report.store_errors
        );
    } else {
        info!(
            "Reconciliation pass: {} attempted, {} finalized, {} pending",
            report.attempted, report.finalized, report.pending
        );
    }
}

/// Owner-side handle of a running reconciler
pub struct ReconcilerHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Ask the worker to exit and wait for it. An in-flight pass completes
    /// first; a back-off wait is cut short.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            error!("Accrual reconciler task failed: {}", e);
        }
    }
}
