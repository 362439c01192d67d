//! Error taxonomy for the billing core.
//!
//! Every variant here is locally recoverable: errors surface as user-visible
//! messages and return the payment flow to an actionable state. Nothing in
//! this module aborts the host application.

use thiserror::Error;

use crate::invoice::InvoiceStatus;

// ---------------------------------------------------------------------------
// Collaborator-level errors
// ---------------------------------------------------------------------------

/// Failure reported by (or on the way to) the admin dashboard API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The requested record does not exist on the backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend understood the request and refused it.
    #[error("{0}")]
    Rejected(String),

    /// The request exceeded its client-side timeout.
    #[error("request timed out")]
    Timeout,

    /// Connectivity or server-side trouble; safe to try again later.
    #[error("{0}")]
    Transient(String),
}

// ---------------------------------------------------------------------------
// Flow-level errors
// ---------------------------------------------------------------------------

/// User-facing failure of a payment flow operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// Payment attempted against an invoice that is not payable.
    #[error("invoice is not payable (status: {status})")]
    InvalidInvoiceState { status: InvoiceStatus },

    /// `start_payment` called before any invoice was loaded.
    #[error("no invoice loaded for this payment flow")]
    InvoiceNotLoaded,

    /// Cash amount does not equal the invoice total. Partial and
    /// over-payment are both rejected.
    #[error("cash amount {given} does not match invoice total {expected}")]
    InvalidAmount { given: i64, expected: i64 },

    /// A payment initiator is already in flight for this attempt.
    #[error("payment flow is busy ({state})")]
    FlowBusy { state: String },

    /// The current attempt already reached a terminal state; reload the
    /// invoice to start a new one.
    #[error("payment attempt already settled; reload the invoice to retry")]
    AttemptSettled,

    /// Gateway session request failed or timed out. No polling was started.
    #[error("could not start gateway payment: {0}")]
    SessionCreationFailed(String),

    /// Too many consecutive probe failures while confirming. The invoice is
    /// untouched; check connectivity and re-check later.
    #[error("could not confirm payment, check connectivity and try again")]
    PollingFailureBudgetExceeded,

    /// The confirmation window elapsed with the invoice still pending. The
    /// payment may still complete out-of-band; re-check the invoice.
    #[error("payment confirmation timed out; the payment may still complete")]
    PollingTimeout,

    /// Server-side business rejection of a direct payment, reported verbatim.
    #[error("payment rejected: {0}")]
    DirectPaymentRejected(String),

    /// Transport failure during the direct payment call. The outcome is
    /// unknown; the invoice must be re-checked before any retry.
    #[error("payment could not be confirmed as recorded: {0}")]
    DirectPaymentFailed(String),

    /// The invoice could not be loaded.
    #[error("could not load invoice: {0}")]
    InvoiceFetch(#[from] ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_amount_message_names_both_amounts() {
        let err = PaymentError::InvalidAmount {
            given: 499_000,
            expected: 500_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("499000"));
        assert!(msg.contains("500000"));
    }

    #[test]
    fn test_timeout_and_failure_budget_messages_differ() {
        let timeout = PaymentError::PollingTimeout.to_string();
        let failures = PaymentError::PollingFailureBudgetExceeded.to_string();
        assert_ne!(timeout, failures);
        assert!(timeout.contains("timed out"));
        assert!(failures.contains("connectivity"));
    }

    #[test]
    fn test_api_error_converts_to_invoice_fetch() {
        let err: PaymentError = ApiError::NotFound("invoice for apt-1".into()).into();
        assert!(matches!(err, PaymentError::InvoiceFetch(ApiError::NotFound(_))));
        assert!(err.to_string().contains("could not load invoice"));
    }
}
