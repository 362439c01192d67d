//! Invoice model for the billing core.
//!
//! An invoice is the billable record of one appointment. The billing backend
//! owns it; this client only re-fetches it, except for the one documented
//! optimistic case: a confirmed direct (cash) payment marks success locally
//! ahead of the next authoritative fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Payment status of an invoice, as reported by the billing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
    Failed,
}

impl InvoiceStatus {
    /// Wire value, as the backend spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
            InvoiceStatus::Failed => "FAILED",
        }
    }

    /// Whether this status ends the billing lifecycle of the invoice.
    pub fn is_terminal(self) -> bool {
        !matches!(self, InvoiceStatus::Pending)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Invoice
// ---------------------------------------------------------------------------

/// Billable record tied to one appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub invoice_id: String,
    pub appointment_id: String,
    pub status: InvoiceStatus,
    /// Amount due in minor currency units. Fixed once the invoice is issued.
    pub total_amount: i64,
    /// Amount recorded as paid, once a payment lands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Whether a payment may be started against this invoice.
    pub fn is_payable(&self) -> bool {
        self.status == InvoiceStatus::Pending
    }

    /// Optimistic local success mark after a confirmed direct payment. The
    /// authoritative status still comes from the next fetch.
    pub(crate) fn mark_paid(&mut self, paid_amount: i64) {
        self.status = InvoiceStatus::Paid;
        self.paid_amount = Some(paid_amount);
        self.updated_at = Some(Utc::now());
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invoice_wire_payload() {
        let invoice: Invoice = serde_json::from_value(serde_json::json!({
            "invoiceId": "inv-1001",
            "appointmentId": "apt-42",
            "status": "PENDING",
            "totalAmount": 500000,
        }))
        .expect("parse invoice");
        assert_eq!(invoice.invoice_id, "inv-1001");
        assert_eq!(invoice.appointment_id, "apt-42");
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.total_amount, 500000);
        assert_eq!(invoice.paid_amount, None);
        assert!(invoice.is_payable());
    }

    #[test]
    fn test_parse_paid_invoice_with_amounts() {
        let invoice: Invoice = serde_json::from_value(serde_json::json!({
            "invoiceId": "inv-1002",
            "appointmentId": "apt-43",
            "status": "PAID",
            "totalAmount": 120000,
            "paidAmount": 120000,
            "updatedAt": "2026-03-01T10:15:00Z",
        }))
        .expect("parse paid invoice");
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.paid_amount, Some(120000));
        assert!(invoice.updated_at.is_some());
        assert!(!invoice.is_payable());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result = serde_json::from_value::<Invoice>(serde_json::json!({
            "invoiceId": "inv-1003",
            "appointmentId": "apt-44",
            "status": "REFUNDED",
            "totalAmount": 100,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!InvoiceStatus::Pending.is_terminal());
        assert!(InvoiceStatus::Paid.is_terminal());
        assert!(InvoiceStatus::Cancelled.is_terminal());
        assert!(InvoiceStatus::Failed.is_terminal());
    }

    #[test]
    fn test_mark_paid_sets_status_and_amount() {
        let mut invoice = Invoice {
            invoice_id: "inv-1".into(),
            appointment_id: "apt-1".into(),
            status: InvoiceStatus::Pending,
            total_amount: 2500,
            paid_amount: None,
            updated_at: None,
        };
        invoice.mark_paid(2500);
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.paid_amount, Some(2500));
        assert!(invoice.updated_at.is_some());
    }
}
