//! Payment confirmation orchestrator.
//!
//! Owns the invoice/payment flow state machine: method dispatch, the polling
//! run that watches a gateway payment, and the exactly-once hand-off from
//! "payment in flight" to a terminal outcome. The presentation shell drives
//! it through [`PaymentOrchestrator::load_invoice`],
//! [`PaymentOrchestrator::start_payment`] and
//! [`PaymentOrchestrator::cancel`], and renders the snapshot stream.
//!
//! Two pieces of owned state make the engine's delivery races safe: a
//! `settled` latch (once any hand-off fires, or cancel clears interest,
//! every later observation is a no-op) and an attempt generation counter
//! (callbacks from a superseded polling run are dropped).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::PaymentsConfig;
use crate::error::{ApiError, PaymentError};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::payment::backend::{BillingBackend, DirectPaymentRequest, GatewaySession};
use crate::payment::polling::{spawn_polling_run, Decision, PollOutcome, PollingRun};

// ---------------------------------------------------------------------------
// Flow state
// ---------------------------------------------------------------------------

/// State of one payment confirmation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingMethodChoice,
    CashSubmitting,
    GatewaySessionCreating,
    GatewayPolling,
    SettledSuccess,
    SettledFailure,
    SettledCancelled,
}

impl FlowState {
    /// Whether this state ends the current payment attempt.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            FlowState::SettledSuccess | FlowState::SettledFailure | FlowState::SettledCancelled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::AwaitingMethodChoice => "awaiting_method_choice",
            FlowState::CashSubmitting => "cash_submitting",
            FlowState::GatewaySessionCreating => "gateway_session_creating",
            FlowState::GatewayPolling => "gateway_polling",
            FlowState::SettledSuccess => "settled_success",
            FlowState::SettledFailure => "settled_failure",
            FlowState::SettledCancelled => "settled_cancelled",
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How the user wants to pay.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentMethod {
    /// Immediate payment recorded directly by staff.
    Cash { amount: i64, notes: Option<String> },
    /// External gateway payment via a redirect session.
    Gateway { origin_tag: String },
}

/// Terminal business outcome of a settled attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Success,
    Failure,
}

/// One-time hand-off event the shell navigates on.
#[derive(Debug, Clone)]
pub struct Handoff {
    pub outcome: SettlementOutcome,
    pub invoice: Option<Invoice>,
    pub reason: Option<PaymentError>,
}

/// Observable snapshot of the flow, rendered by the shell.
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub state: FlowState,
    pub invoice: Option<Invoice>,
    pub session: Option<GatewaySession>,
    pub error: Option<PaymentError>,
}

/// Event streams handed to the shell on construction.
pub struct FlowEvents {
    /// Latest snapshot; the shell renders whatever is current.
    pub snapshots: watch::Receiver<FlowSnapshot>,
    /// Hand-off events; at most one per attempt, ever.
    pub handoffs: mpsc::UnboundedReceiver<Handoff>,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Inner {
    state: FlowState,
    appointment_id: Option<String>,
    invoice: Option<Invoice>,
    session: Option<GatewaySession>,
    polling: Option<PollingRun>,
    /// Hand-off latch. Once set, all later observations are no-ops.
    settled: bool,
    /// Generation counter; callbacks from superseded runs compare against it.
    attempt: u64,
    error: Option<PaymentError>,
}

struct Shared {
    inner: Mutex<Inner>,
    snapshot_tx: watch::Sender<FlowSnapshot>,
    handoff_tx: mpsc::UnboundedSender<Handoff>,
}

impl Shared {
    // Recover the guard on poison; transitions never panic while holding
    // the lock, so the data is consistent either way.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, inner: &Inner) {
        self.snapshot_tx.send_replace(FlowSnapshot {
            state: inner.state,
            invoice: inner.invoice.clone(),
            session: inner.session.clone(),
            error: inner.error.clone(),
        });
    }

    /// Perform the one-time hand-off. No-op if the latch is already set.
    fn fire_handoff(
        &self,
        inner: &mut Inner,
        outcome: SettlementOutcome,
        reason: Option<PaymentError>,
    ) {
        if inner.settled {
            return;
        }
        inner.settled = true;
        if let Some(run) = inner.polling.take() {
            run.stop();
        }
        inner.session = None;
        inner.state = match outcome {
            SettlementOutcome::Success => FlowState::SettledSuccess,
            SettlementOutcome::Failure => FlowState::SettledFailure,
        };
        inner.error = reason.clone();
        let _ = self.handoff_tx.send(Handoff {
            outcome,
            invoice: inner.invoice.clone(),
            reason,
        });
        self.emit(inner);
        info!(outcome = ?outcome, "payment hand-off fired");
    }

    /// Invoked once per successful poll.
    fn on_invoice_observed(&self, attempt: u64, invoice: Invoice) -> Decision {
        let mut inner = self.lock();
        if inner.settled || inner.attempt != attempt {
            return Decision::Settle;
        }
        let status = invoice.status;
        let invoice_id = invoice.invoice_id.clone();
        inner.invoice = Some(invoice);
        match status {
            InvoiceStatus::Pending => {
                self.emit(&inner);
                Decision::Continue
            }
            InvoiceStatus::Paid => {
                info!(invoice_id = %invoice_id, "gateway payment confirmed");
                self.fire_handoff(&mut inner, SettlementOutcome::Success, None);
                Decision::Settle
            }
            InvoiceStatus::Cancelled | InvoiceStatus::Failed => {
                warn!(invoice_id = %invoice_id, status = %status, "invoice reached a terminal non-paid status");
                self.fire_handoff(&mut inner, SettlementOutcome::Failure, None);
                Decision::Settle
            }
        }
    }

    /// Invoked exactly once when a polling run ends.
    fn on_polling_ended(&self, attempt: u64, outcome: PollOutcome) {
        let mut inner = self.lock();
        if inner.attempt != attempt {
            return;
        }
        inner.polling = None;
        match outcome {
            // Settled and cancelled runs already transitioned elsewhere.
            PollOutcome::Settled | PollOutcome::Cancelled => {}
            PollOutcome::TimedOut => {
                if !inner.settled {
                    warn!("payment confirmation timed out; invoice left untouched");
                    inner.session = None;
                    inner.state = FlowState::AwaitingMethodChoice;
                    inner.error = Some(PaymentError::PollingTimeout);
                    self.emit(&inner);
                }
            }
            PollOutcome::FailuresExhausted => {
                if !inner.settled {
                    warn!("payment confirmation stopped after repeated probe failures");
                    inner.session = None;
                    inner.state = FlowState::AwaitingMethodChoice;
                    inner.error = Some(PaymentError::PollingFailureBudgetExceeded);
                    self.emit(&inner);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Orchestrates one payment confirmation flow over the billing backend.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    backend: Arc<dyn BillingBackend>,
    config: PaymentsConfig,
    shared: Arc<Shared>,
}

impl PaymentOrchestrator {
    pub fn new(backend: Arc<dyn BillingBackend>, config: PaymentsConfig) -> (Self, FlowEvents) {
        let initial = FlowSnapshot {
            state: FlowState::Idle,
            invoice: None,
            session: None,
            error: None,
        };
        let (snapshot_tx, snapshots) = watch::channel(initial);
        let (handoff_tx, handoffs) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: FlowState::Idle,
                appointment_id: None,
                invoice: None,
                session: None,
                polling: None,
                settled: false,
                attempt: 0,
                error: None,
            }),
            snapshot_tx,
            handoff_tx,
        });
        (
            Self {
                backend,
                config,
                shared,
            },
            FlowEvents { snapshots, handoffs },
        )
    }

    /// Current snapshot (state, invoice, last error).
    pub fn snapshot(&self) -> FlowSnapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    pub fn state(&self) -> FlowState {
        self.shared.lock().state
    }

    /// Fetch the invoice for an appointment and open a fresh attempt.
    ///
    /// Also the manual re-check path after a timeout or connectivity stop:
    /// any previous polling run is torn down and its late results dropped.
    pub async fn load_invoice(&self, appointment_id: &str) -> Result<Invoice, PaymentError> {
        let attempt = {
            let mut inner = self.shared.lock();
            inner.attempt += 1;
            if let Some(run) = inner.polling.take() {
                run.stop();
            }
            inner.session = None;
            inner.invoice = None;
            inner.settled = false;
            inner.error = None;
            inner.state = FlowState::Idle;
            inner.appointment_id = Some(appointment_id.to_string());
            self.shared.emit(&inner);
            inner.attempt
        };

        match self.backend.fetch_invoice_by_appointment(appointment_id).await {
            Ok(invoice) => {
                let mut inner = self.shared.lock();
                if inner.attempt == attempt {
                    inner.invoice = Some(invoice.clone());
                    inner.state = FlowState::AwaitingMethodChoice;
                    self.shared.emit(&inner);
                }
                Ok(invoice)
            }
            Err(err) => {
                let err = PaymentError::InvoiceFetch(err);
                let mut inner = self.shared.lock();
                if inner.attempt == attempt {
                    inner.error = Some(err.clone());
                    self.shared.emit(&inner);
                }
                Err(err)
            }
        }
    }

    /// Start a payment with the chosen method.
    ///
    /// Precondition: a loaded invoice in `Pending` status. Cash settles (or
    /// fails) immediately; gateway creates a session and starts polling.
    pub async fn start_payment(&self, method: PaymentMethod) -> Result<(), PaymentError> {
        match method {
            PaymentMethod::Cash { amount, notes } => self.start_cash(amount, notes).await,
            PaymentMethod::Gateway { origin_tag } => self.start_gateway(origin_tag).await,
        }
    }

    /// Abandon the current attempt. Tears down polling, fires no hand-off.
    /// Idempotent, including after a natural completion.
    pub fn cancel(&self) {
        let mut inner = self.shared.lock();
        if inner.settled {
            return;
        }
        if let Some(run) = inner.polling.take() {
            run.stop();
        }
        inner.session = None;
        inner.settled = true;
        inner.state = FlowState::SettledCancelled;
        inner.error = None;
        self.shared.emit(&inner);
        info!("payment flow cancelled by user");
    }

    /// Return to `Idle` so a new attempt can be started. The invoice must be
    /// re-loaded before the next payment.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        inner.attempt += 1;
        if let Some(run) = inner.polling.take() {
            run.stop();
        }
        inner.session = None;
        inner.invoice = None;
        inner.settled = false;
        inner.error = None;
        inner.state = FlowState::Idle;
        self.shared.emit(&inner);
    }

    /// Component-teardown cleanup: stop polling, drop the session, clear
    /// pending interest so late results are dropped. No state transition,
    /// no events.
    pub fn shutdown(&self) {
        let mut inner = self.shared.lock();
        if let Some(run) = inner.polling.take() {
            run.stop();
        }
        inner.session = None;
        inner.settled = true;
        info!("payment orchestrator shut down");
    }

    // -----------------------------------------------------------------------
    // Method dispatch
    // -----------------------------------------------------------------------

    fn check_ready(inner: &Inner) -> Result<(), PaymentError> {
        if inner.settled {
            return Err(PaymentError::AttemptSettled);
        }
        if matches!(
            inner.state,
            FlowState::CashSubmitting | FlowState::GatewaySessionCreating
        ) {
            return Err(PaymentError::FlowBusy {
                state: inner.state.label().to_string(),
            });
        }
        let invoice = inner.invoice.as_ref().ok_or(PaymentError::InvoiceNotLoaded)?;
        if !invoice.is_payable() {
            return Err(PaymentError::InvalidInvoiceState {
                status: invoice.status,
            });
        }
        Ok(())
    }

    async fn start_cash(&self, amount: i64, notes: Option<String>) -> Result<(), PaymentError> {
        let (request, attempt) = {
            let mut inner = self.shared.lock();
            Self::check_ready(&inner)?;
            let invoice = inner.invoice.as_ref().ok_or(PaymentError::InvoiceNotLoaded)?;
            // The business rule is equality: partial and over-payment are
            // both rejected before any network call.
            if amount != invoice.total_amount {
                return Err(PaymentError::InvalidAmount {
                    given: amount,
                    expected: invoice.total_amount,
                });
            }
            let request = DirectPaymentRequest::new(invoice.invoice_id.clone(), amount, notes);
            // New generation: callbacks from any superseded run go stale.
            inner.attempt += 1;
            if let Some(run) = inner.polling.take() {
                run.stop();
            }
            inner.session = None;
            inner.state = FlowState::CashSubmitting;
            inner.error = None;
            self.shared.emit(&inner);
            (request, inner.attempt)
        };

        info!(invoice_id = %request.invoice_id, amount, "recording direct payment");
        let result = self.backend.record_direct_payment(&request).await;

        let mut inner = self.shared.lock();
        if inner.attempt != attempt {
            // A reload superseded this attempt; drop the result silently.
            return Ok(());
        }
        match result {
            Ok(receipt) => {
                info!(payment_id = %receipt.payment_id, "direct payment recorded");
                if !inner.settled {
                    if let Some(invoice) = inner.invoice.as_mut() {
                        invoice.mark_paid(amount);
                    }
                }
                self.shared
                    .fire_handoff(&mut inner, SettlementOutcome::Success, None);
                Ok(())
            }
            Err(ApiError::Rejected(reason)) => {
                let err = PaymentError::DirectPaymentRejected(reason);
                if !inner.settled {
                    inner.state = FlowState::AwaitingMethodChoice;
                    inner.error = Some(err.clone());
                    self.shared.emit(&inner);
                }
                Err(err)
            }
            Err(other) => {
                let err = PaymentError::DirectPaymentFailed(other.to_string());
                warn!(error = %err, "direct payment outcome unknown; invoice must be re-checked");
                if !inner.settled {
                    inner.state = FlowState::AwaitingMethodChoice;
                    inner.error = Some(err.clone());
                    self.shared.emit(&inner);
                }
                Err(err)
            }
        }
    }

    async fn start_gateway(&self, origin_tag: String) -> Result<(), PaymentError> {
        let (appointment_id, attempt) = {
            let mut inner = self.shared.lock();
            Self::check_ready(&inner)?;
            let appointment_id = inner
                .appointment_id
                .clone()
                .ok_or(PaymentError::InvoiceNotLoaded)?;
            // Starting a new session invalidates interest in any previous
            // one; the generation bump makes the old run's callbacks stale.
            inner.attempt += 1;
            if let Some(run) = inner.polling.take() {
                run.stop();
            }
            inner.session = None;
            inner.state = FlowState::GatewaySessionCreating;
            inner.error = None;
            self.shared.emit(&inner);
            (appointment_id, inner.attempt)
        };

        info!(appointment_id = %appointment_id, origin_tag = %origin_tag, "creating gateway session");
        let result = match tokio::time::timeout(
            self.config.session_request_timeout,
            self.backend.create_gateway_session(&appointment_id, &origin_tag),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        };

        let mut inner = self.shared.lock();
        if inner.attempt != attempt {
            return Ok(());
        }
        let session = match result {
            Ok(session) => session,
            Err(err) => {
                let err = PaymentError::SessionCreationFailed(err.to_string());
                // Terminal for this attempt; polling was never started.
                self.shared
                    .fire_handoff(&mut inner, SettlementOutcome::Failure, Some(err.clone()));
                return Err(err);
            }
        };
        if inner.settled {
            // Cancelled while the session request was in flight.
            return Ok(());
        }

        inner.session = Some(session);
        inner.state = FlowState::GatewayPolling;
        self.shared.emit(&inner);

        let backend = self.backend.clone();
        let probe_appointment = appointment_id.clone();
        let shared_for_invoice = self.shared.clone();
        let shared_for_end = self.shared.clone();
        let run = spawn_polling_run(
            self.config.polling.clone(),
            move || {
                let backend = backend.clone();
                let appointment_id = probe_appointment.clone();
                async move { backend.fetch_invoice_by_appointment(&appointment_id).await }
            },
            move |invoice| shared_for_invoice.on_invoice_observed(attempt, invoice),
            move |outcome| shared_for_end.on_polling_ended(attempt, outcome),
        );
        inner.polling = Some(run);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
