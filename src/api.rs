//! Admin dashboard API client.
//!
//! Authenticated HTTP access to the FieldDesk admin dashboard: connectivity
//! testing, invoice reads, and the two payment initiators. This is the
//! production [`BillingBackend`] the payment orchestrator runs against.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::info;

use crate::error::ApiError;
use crate::invoice::Invoice;
use crate::payment::backend::{
    BillingBackend, DirectPaymentReceipt, DirectPaymentRequest, GatewaySession,
};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for gateway session creation; failing fast matters more here
/// than riding out a slow backend.
const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the admin dashboard URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    let mut url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if trimmed.starts_with("localhost") || trimmed.starts_with("127.0.0.1") {
        format!("http://{trimmed}")
    } else {
        format!("https://{trimmed}")
    };

    loop {
        let len = url.len();
        while url.ends_with('/') {
            url.pop();
        }
        if url.ends_with("/api") {
            url.truncate(url.len() - 4);
        }
        if url.len() == len {
            break;
        }
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into the collaborator taxonomy.
fn map_transport_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout;
    }
    if err.is_connect() {
        return ApiError::Transient(format!("cannot reach admin dashboard at {url}"));
    }
    if err.is_builder() {
        return ApiError::Transient(format!("invalid admin dashboard URL: {url}"));
    }
    ApiError::Transient(format!("network error communicating with {url}: {err}"))
}

/// Convert an HTTP status code into a user-friendly message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "terminal not authorized".to_string(),
        404 => "admin dashboard endpoint not found".to_string(),
        s if s >= 500 => format!("admin dashboard server error (HTTP {s})"),
        s => format!("unexpected response from admin dashboard (HTTP {s})"),
    }
}

/// Classify a non-success response, preserving backend validation detail.
fn error_from_response(status: StatusCode, body: &str) -> ApiError {
    // Backends report details under "error" or "message"; keep those
    // verbatim for the user instead of a bare status code.
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        json.get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    });
    let message = detail.unwrap_or_else(|| status_message(status));

    match status.as_u16() {
        404 => ApiError::NotFound(message),
        s if (400..500).contains(&s) => ApiError::Rejected(message),
        s => ApiError::Transient(format!("{message} (HTTP {s})")),
    }
}

// ---------------------------------------------------------------------------
// Response unwrapping
// ---------------------------------------------------------------------------

/// Pull a typed payload out of a response that may wrap it under `key`.
fn unwrap_payload<T: serde::de::DeserializeOwned>(
    value: Value,
    key: &str,
    what: &str,
) -> Result<T, ApiError> {
    let raw = match value.get(key) {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => value,
    };
    serde_json::from_value(raw)
        .map_err(|e| ApiError::Transient(format!("malformed {what} payload: {e}")))
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

/// Result of a connectivity test.
#[derive(Debug, serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Authenticated client for the admin dashboard billing endpoints.
pub struct BillingApiClient {
    base_url: String,
    api_key: String,
    terminal_id: Option<String>,
    request_timeout: Duration,
    session_timeout: Duration,
}

impl BillingApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            api_key: api_key.trim().to_string(),
            terminal_id: None,
            request_timeout: DEFAULT_TIMEOUT,
            session_timeout: SESSION_TIMEOUT,
        }
    }

    /// Attach the terminal id header required by the dashboard's auth layer.
    pub fn with_terminal_id(mut self, terminal_id: &str) -> Self {
        let trimmed = terminal_id.trim();
        if !trimmed.is_empty() {
            self.terminal_id = Some(trimmed.to_string());
        }
        self
    }

    pub fn with_timeouts(mut self, request: Duration, session: Duration) -> Self {
        self.request_timeout = request;
        self.session_timeout = session;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http_client(&self, timeout: Duration) -> Result<Client, ApiError> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transient(format!("failed to create HTTP client: {e}")))
    }

    /// Perform an authenticated request. `path` includes the leading slash,
    /// e.g. `/api/console/appointments/apt-1/invoice`.
    async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{}", self.base_url, path);
        let client = self.http_client(timeout)?;

        let mut req = client
            .request(method, &full_url)
            .header("X-Console-API-Key", &self.api_key)
            .header("Content-Type", "application/json");
        if let Some(terminal_id) = &self.terminal_id {
            req = req.header("x-terminal-id", terminal_id);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| map_transport_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(error_from_response(status, &body_text));
        }
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| ApiError::Transient(format!("invalid JSON from admin dashboard: {e}")))
    }

    /// Test connectivity to the admin dashboard with a lightweight
    /// health-check, measuring round-trip latency.
    pub async fn test_connectivity(&self) -> ConnectivityResult {
        let client = match self.http_client(CONNECTIVITY_TIMEOUT) {
            Ok(c) => c,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                };
            }
        };
        let health_url = format!("{}/api/health", self.base_url);
        let start = Instant::now();

        let resp = match client
            .get(&health_url)
            .header("X-Console-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(map_transport_error(&self.base_url, &e).to_string()),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        if status.is_success() {
            info!(latency_ms = latency, "connectivity test passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(status_message(status)),
            }
        }
    }
}

#[async_trait]
impl BillingBackend for BillingApiClient {
    async fn fetch_invoice_by_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Invoice, ApiError> {
        let path = format!("/api/console/appointments/{appointment_id}/invoice");
        let value = self
            .fetch(Method::GET, &path, None, self.request_timeout)
            .await?;
        unwrap_payload(value, "invoice", "invoice")
    }

    async fn record_direct_payment(
        &self,
        request: &DirectPaymentRequest,
    ) -> Result<DirectPaymentReceipt, ApiError> {
        let path = format!("/api/console/invoices/{}/payments", request.invoice_id);
        let body = serde_json::to_value(request)
            .map_err(|e| ApiError::Transient(format!("failed to encode payment: {e}")))?;
        let value = self
            .fetch(Method::POST, &path, Some(&body), self.request_timeout)
            .await?;
        unwrap_payload(value, "payment", "payment receipt")
    }

    async fn create_gateway_session(
        &self,
        appointment_id: &str,
        origin_tag: &str,
    ) -> Result<GatewaySession, ApiError> {
        let path = format!("/api/console/appointments/{appointment_id}/gateway-session");
        let body = serde_json::json!({ "originTag": origin_tag });
        let value = self
            .fetch(Method::POST, &path, Some(&body), self.session_timeout)
            .await?;
        unwrap_payload(value, "session", "gateway session")
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_adds_scheme() {
        assert_eq!(
            normalize_base_url("admin.fielddesk.app"),
            "https://admin.fielddesk.app"
        );
        assert_eq!(
            normalize_base_url("localhost:3000"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_base_url("127.0.0.1:3000"),
            "http://127.0.0.1:3000"
        );
    }

    #[test]
    fn test_normalize_base_url_strips_slashes_and_api() {
        assert_eq!(
            normalize_base_url("https://admin.fielddesk.app/"),
            "https://admin.fielddesk.app"
        );
        assert_eq!(
            normalize_base_url("https://admin.fielddesk.app/api"),
            "https://admin.fielddesk.app"
        );
        assert_eq!(
            normalize_base_url("https://admin.fielddesk.app/api/"),
            "https://admin.fielddesk.app"
        );
        assert_eq!(
            normalize_base_url("  admin.fielddesk.app/api///  "),
            "https://admin.fielddesk.app"
        );
    }

    #[test]
    fn test_status_messages() {
        assert!(status_message(StatusCode::UNAUTHORIZED).contains("API key"));
        assert!(status_message(StatusCode::FORBIDDEN).contains("not authorized"));
        assert!(status_message(StatusCode::NOT_FOUND).contains("not found"));
        assert!(status_message(StatusCode::BAD_GATEWAY).contains("server error"));
        assert!(status_message(StatusCode::IM_A_TEAPOT).contains("unexpected"));
    }

    #[test]
    fn test_error_from_response_classifies_by_status() {
        let not_found = error_from_response(StatusCode::NOT_FOUND, "");
        assert!(matches!(not_found, ApiError::NotFound(_)));

        let rejected = error_from_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"invoice already paid"}"#,
        );
        assert_eq!(rejected, ApiError::Rejected("invoice already paid".into()));

        let transient = error_from_response(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(transient, ApiError::Transient(_)));
    }

    #[test]
    fn test_error_from_response_prefers_body_detail() {
        let err = error_from_response(
            StatusCode::BAD_REQUEST,
            r#"{"message":"amount must equal invoice total"}"#,
        );
        assert_eq!(
            err,
            ApiError::Rejected("amount must equal invoice total".into())
        );

        // Non-JSON bodies fall back to the status table.
        let err = error_from_response(StatusCode::BAD_REQUEST, "<html>oops</html>");
        assert!(matches!(err, ApiError::Rejected(_)));
    }

    #[test]
    fn test_unwrap_payload_accepts_bare_and_wrapped() {
        let bare = serde_json::json!({
            "invoiceId": "inv-1",
            "appointmentId": "apt-1",
            "status": "PENDING",
            "totalAmount": 1000,
        });
        let invoice: Invoice =
            unwrap_payload(bare.clone(), "invoice", "invoice").expect("bare payload");
        assert_eq!(invoice.invoice_id, "inv-1");

        let wrapped = serde_json::json!({ "success": true, "invoice": bare });
        let invoice: Invoice =
            unwrap_payload(wrapped, "invoice", "invoice").expect("wrapped payload");
        assert_eq!(invoice.invoice_id, "inv-1");
    }

    #[test]
    fn test_unwrap_payload_reports_malformed_body() {
        let err =
            unwrap_payload::<Invoice>(serde_json::json!({ "success": true }), "invoice", "invoice")
                .expect_err("missing fields");
        assert!(matches!(err, ApiError::Transient(_)));
        assert!(err.to_string().contains("malformed invoice payload"));
    }

    #[test]
    fn test_client_builder_options() {
        let client = BillingApiClient::new(" admin.fielddesk.app/api/ ", " key-1 ")
            .with_terminal_id(" term-9 ")
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(client.base_url(), "https://admin.fielddesk.app");
        assert_eq!(client.api_key, "key-1");
        assert_eq!(client.terminal_id.as_deref(), Some("term-9"));
        assert_eq!(client.request_timeout, Duration::from_secs(5));
        assert_eq!(client.session_timeout, Duration::from_secs(2));
    }
}
