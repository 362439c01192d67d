//! FieldDesk Billing - payment confirmation core for the FieldDesk console.
//!
//! The staff console for an appointment-and-maintenance service business is
//! mostly CRUD forms over the admin dashboard API. This crate carries the one
//! subsystem with real concurrency hazards: taking an invoice into a
//! "pay now" flow, recording a direct (cash) payment or launching an
//! externally-redirected gateway payment, and detecting completion of the
//! redirected path by bounded polling - without duplicate side effects,
//! races, or leaked timers.
//!
//! The shell drives [`PaymentOrchestrator`] and renders its snapshot stream;
//! everything else here exists in service of that flow.

pub mod api;
pub mod config;
pub mod error;
pub mod invoice;
pub mod payment;
pub mod telemetry;

pub use api::BillingApiClient;
pub use config::{PaymentsConfig, PollingConfig};
pub use error::{ApiError, PaymentError};
pub use invoice::{Invoice, InvoiceStatus};
pub use payment::backend::{
    BillingBackend, DirectPaymentReceipt, DirectPaymentRequest, GatewaySession,
};
pub use payment::orchestrator::{
    FlowEvents, FlowSnapshot, FlowState, Handoff, PaymentMethod, PaymentOrchestrator,
    SettlementOutcome,
};
pub use payment::polling::{spawn_polling_run, Decision, PollOutcome, PollingRun};
