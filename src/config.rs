//! Configuration for the billing core.
//!
//! Budgets and cadences vary per deployment; the defaults here are deliberate
//! picks, not protocol constants. Hosts override whatever their deployment
//! needs and pass the result into the orchestrator.

use std::time::Duration;

/// Default cadence between invoice probes.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default wall-clock cap on a polling run.
const DEFAULT_WALL_CLOCK_BUDGET: Duration = Duration::from_secs(5 * 60);

/// Default number of consecutive probe failures tolerated before giving up.
const DEFAULT_FAILURE_BUDGET: u32 = 3;

/// Default fixed delay before the next probe after a failed one.
const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(5);

/// Default timeout for the gateway session request.
const DEFAULT_SESSION_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for ordinary API requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Floor for a zero poll interval supplied by a host.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Bounds for one polling run watching an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Fixed cadence between successful probes.
    pub interval: Duration,
    /// Wall-clock cap on the whole run.
    pub wall_clock_budget: Duration,
    /// Consecutive probe failures tolerated before the run stops.
    pub failure_budget: u32,
    /// Fixed delay before the next probe after a failure.
    pub failure_backoff: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            wall_clock_budget: DEFAULT_WALL_CLOCK_BUDGET,
            failure_budget: DEFAULT_FAILURE_BUDGET,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
        }
    }
}

impl PollingConfig {
    /// Clamp zero durations to usable values.
    pub fn sanitized(mut self) -> Self {
        if self.interval.is_zero() {
            self.interval = MIN_POLL_INTERVAL;
        }
        if self.wall_clock_budget.is_zero() {
            self.wall_clock_budget = DEFAULT_WALL_CLOCK_BUDGET;
        }
        if self.failure_backoff.is_zero() {
            self.failure_backoff = self.interval;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// Configuration for the payment confirmation flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentsConfig {
    pub polling: PollingConfig,
    /// Timeout for gateway session creation, distinct from the polling
    /// wall-clock budget.
    pub session_request_timeout: Duration,
    /// Timeout for ordinary API requests (invoice fetch, direct payment).
    pub request_timeout: Duration,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            session_request_timeout: DEFAULT_SESSION_REQUEST_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polling_defaults() {
        let cfg = PollingConfig::default();
        assert_eq!(cfg.interval, Duration::from_secs(3));
        assert_eq!(cfg.wall_clock_budget, Duration::from_secs(300));
        assert_eq!(cfg.failure_budget, 3);
        assert_eq!(cfg.failure_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_sanitized_clamps_zero_durations() {
        let cfg = PollingConfig {
            interval: Duration::ZERO,
            wall_clock_budget: Duration::ZERO,
            failure_budget: 0,
            failure_backoff: Duration::ZERO,
        }
        .sanitized();
        assert_eq!(cfg.interval, Duration::from_millis(500));
        assert_eq!(cfg.wall_clock_budget, Duration::from_secs(300));
        // A zero failure budget stays zero: the first failure is fatal.
        assert_eq!(cfg.failure_budget, 0);
        assert_eq!(cfg.failure_backoff, cfg.interval);
    }

    #[test]
    fn test_sanitized_keeps_explicit_values() {
        let cfg = PollingConfig {
            interval: Duration::from_secs(1),
            wall_clock_budget: Duration::from_secs(90),
            failure_budget: 5,
            failure_backoff: Duration::from_secs(2),
        };
        assert_eq!(cfg.clone().sanitized(), cfg);
    }

    #[test]
    fn test_payments_defaults() {
        let cfg = PaymentsConfig::default();
        assert_eq!(cfg.session_request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }
}
