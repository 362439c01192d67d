//! Billing backend trait and payment initiator types.
//!
//! The seam between the payment flow and the admin dashboard. Production
//! code uses [`crate::api::BillingApiClient`]; tests script a fake. The
//! orchestrator only ever sees this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::invoice::Invoice;

// ---------------------------------------------------------------------------
// Direct payment
// ---------------------------------------------------------------------------

/// Request to record a direct (cash) payment against an invoice.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPaymentRequest {
    pub invoice_id: String,
    /// Amount in minor currency units; must equal the invoice total.
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Client-generated reference. The call is single-attempt on this side;
    /// the reference lets the backend deduplicate if a resubmit ever happens.
    pub client_reference: Uuid,
}

impl DirectPaymentRequest {
    pub fn new(invoice_id: impl Into<String>, amount: i64, notes: Option<String>) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            amount,
            notes,
            client_reference: Uuid::new_v4(),
        }
    }
}

/// Backend acknowledgement of a recorded direct payment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPaymentReceipt {
    pub payment_id: String,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Gateway session
// ---------------------------------------------------------------------------

/// One outstanding attempt to pay via the external gateway.
///
/// Exclusively owned by one orchestrator attempt; starting a new session
/// tears down interest in any previous one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySession {
    /// Opaque locator the payer must act on (redirect URL or QR payload).
    /// No expiry is known on this side.
    pub redirect_target: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Billing API operations the payment flow depends on.
#[async_trait]
pub trait BillingBackend: Send + Sync {
    /// Fetch the current invoice for an appointment. Pure read, no side
    /// effects.
    async fn fetch_invoice_by_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Invoice, ApiError>;

    /// Record a direct (cash) payment. Single attempt; never retried here.
    async fn record_direct_payment(
        &self,
        request: &DirectPaymentRequest,
    ) -> Result<DirectPaymentReceipt, ApiError>;

    /// Request a redirect session for an external gateway payment. Must fail
    /// cleanly with no partial state.
    async fn create_gateway_session(
        &self,
        appointment_id: &str,
        origin_tag: &str,
    ) -> Result<GatewaySession, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_payment_request_serializes_camel_case() {
        let request = DirectPaymentRequest::new("inv-7", 25000, Some("paid at desk".into()));
        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(value["invoiceId"], "inv-7");
        assert_eq!(value["amount"], 25000);
        assert_eq!(value["notes"], "paid at desk");
        assert!(value["clientReference"].is_string());
    }

    #[test]
    fn test_direct_payment_request_omits_empty_notes() {
        let request = DirectPaymentRequest::new("inv-8", 100, None);
        let value = serde_json::to_value(&request).expect("serialize request");
        assert!(value.get("notes").is_none());
    }

    #[test]
    fn test_requests_get_distinct_client_references() {
        let a = DirectPaymentRequest::new("inv-9", 100, None);
        let b = DirectPaymentRequest::new("inv-9", 100, None);
        assert_ne!(a.client_reference, b.client_reference);
    }

    #[test]
    fn test_gateway_session_parses_with_and_without_id() {
        let bare: GatewaySession = serde_json::from_value(serde_json::json!({
            "redirectTarget": "https://pay.example/s/abc",
        }))
        .expect("parse session");
        assert_eq!(bare.redirect_target, "https://pay.example/s/abc");
        assert_eq!(bare.session_id, None);

        let full: GatewaySession = serde_json::from_value(serde_json::json!({
            "redirectTarget": "https://pay.example/s/def",
            "sessionId": "gw-123",
        }))
        .expect("parse session with id");
        assert_eq!(full.session_id.as_deref(), Some("gw-123"));
    }
}
