//! Bounded polling engine.
//!
//! Substitute for a webhook: probes the invoice accessor on a fixed cadence,
//! bounded by a wall-clock budget and a consecutive-failure budget. One
//! reusable engine, parameterized per caller, instead of per-page timer
//! pairs with divergent cleanup.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::PollingConfig;
use crate::error::ApiError;
use crate::invoice::Invoice;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Caller verdict after each delivered invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep probing on the configured cadence.
    Continue,
    /// Terminal state observed; end the run.
    Settle,
}

/// How a polling run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The invoice handler observed a terminal state.
    Settled,
    /// `stop()` was called (or the handle was dropped).
    Cancelled,
    /// The wall-clock budget ran out with the invoice still pending.
    TimedOut,
    /// Too many consecutive probe failures.
    FailuresExhausted,
}

// ---------------------------------------------------------------------------
// Run handle
// ---------------------------------------------------------------------------

/// Handle to one active polling run. Owned by the orchestrator.
///
/// Dropping the handle cancels the run.
pub struct PollingRun {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollingRun {
    /// Ask the run to stop. Idempotent; safe after natural completion. No
    /// further probe is scheduled once this returns.
    pub fn stop(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Whether the run's task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollingRun {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Spawn a polling run.
///
/// Fires `probe` once immediately (an already-completed payment settles on
/// the first tick), then again every `config.interval`. Probes are strictly
/// sequential: a slow probe delays the next tick, it is never overlapped.
/// Probe failures are retried after `config.failure_backoff` until
/// `config.failure_budget` consecutive failures are exceeded. `on_end` fires
/// exactly once with the run outcome.
pub fn spawn_polling_run<P, Fut, H, E>(
    config: PollingConfig,
    probe: P,
    mut on_invoice: H,
    on_end: E,
) -> PollingRun
where
    P: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Invoice, ApiError>> + Send + 'static,
    H: FnMut(Invoice) -> Decision + Send + 'static,
    E: FnOnce(PollOutcome) + Send + 'static,
{
    let config = config.sanitized();
    let (cancel_tx, mut cancel_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let started = Instant::now();
        let mut consecutive_failures: u32 = 0;

        let outcome = loop {
            if *cancel_rx.borrow() {
                break PollOutcome::Cancelled;
            }

            match probe().await {
                Ok(invoice) => {
                    consecutive_failures = 0;
                    // A stop may have landed while the probe was in flight;
                    // drop the result rather than deliver it.
                    if *cancel_rx.borrow() {
                        break PollOutcome::Cancelled;
                    }
                    if on_invoice(invoice) == Decision::Settle {
                        break PollOutcome::Settled;
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(
                        consecutive_failures,
                        failure_budget = config.failure_budget,
                        error = %err,
                        "invoice probe failed"
                    );
                    if consecutive_failures > config.failure_budget {
                        break PollOutcome::FailuresExhausted;
                    }
                }
            }

            if started.elapsed() >= config.wall_clock_budget {
                break PollOutcome::TimedOut;
            }

            let pause = if consecutive_failures > 0 {
                config.failure_backoff
            } else {
                config.interval
            };
            tokio::select! {
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break PollOutcome::Cancelled;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        };

        debug!(
            ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "polling run ended"
        );
        on_end(outcome);
    });

    PollingRun { cancel_tx, task }
}

// ===========================================================================
// Tests
// ===========================================================================
