//! Connection health computed from round-trips and transport signals.

use chrono::{DateTime, Utc};

use chrome_debug_mcp_core::{ConnectionHealth, HealthStatus};

/// Tracks protocol round-trips of the current connection.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    last_round_trip: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_error: Option<String>,
    reconnecting: bool,
    failure_threshold: u32,
}

impl HealthTracker {
    /// Tracker reporting unhealthy after `failure_threshold` consecutive failures.
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            last_round_trip: None,
            consecutive_failures: 0,
            last_error: None,
            reconnecting: false,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// A round-trip succeeded.
    pub fn record_success(&mut self) {
        self.last_round_trip = Some(Utc::now());
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// A round-trip failed or the transport reported an error.
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(reason.into());
    }

    /// Forget the previous connection's history.
    pub fn reset(&mut self) {
        self.last_round_trip = None;
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// Mark an automatic reconnect as running or finished.
    pub fn set_reconnecting(&mut self, reconnecting: bool) {
        self.reconnecting = reconnecting;
    }

    /// Whether an automatic reconnect is running.
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// Consecutive failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Health given whether a connection exists and its transport is alive.
    pub fn evaluate(&self, transport_alive: Option<bool>) -> ConnectionHealth {
        let (status, detail) = if self.reconnecting {
            (
                HealthStatus::Recovering,
                format!(
                    "reconnecting after connection loss: {}",
                    self.last_error.as_deref().unwrap_or("unknown error")
                ),
            )
        } else {
            match transport_alive {
                None => return self.with_round_trip(ConnectionHealth::disconnected()),
                Some(false) => (
                    HealthStatus::Unhealthy,
                    "browser transport closed".to_string(),
                ),
                Some(true) if self.consecutive_failures >= self.failure_threshold => (
                    HealthStatus::Unhealthy,
                    format!(
                        "{} consecutive heartbeat failures: {}",
                        self.consecutive_failures,
                        self.last_error.as_deref().unwrap_or("unknown error")
                    ),
                ),
                Some(true) if self.consecutive_failures > 0 => (
                    HealthStatus::Recovering,
                    format!(
                        "{} of {} heartbeat failures: {}",
                        self.consecutive_failures,
                        self.failure_threshold,
                        self.last_error.as_deref().unwrap_or("unknown error")
                    ),
                ),
                Some(true) => (HealthStatus::Healthy, "connected".to_string()),
            }
        };

        self.with_round_trip(ConnectionHealth {
            status,
            detail,
            last_round_trip: None,
        })
    }

    fn with_round_trip(&self, mut health: ConnectionHealth) -> ConnectionHealth {
        health.last_round_trip = self.last_round_trip;
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_connection_is_unhealthy() {
        let tracker = HealthTracker::new(3);
        let health = tracker.evaluate(None);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.detail, "no browser connection");
    }

    #[test]
    fn test_closed_transport_is_unhealthy() {
        let mut tracker = HealthTracker::new(3);
        tracker.record_success();
        assert_eq!(tracker.evaluate(Some(false)).status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_failures_degrade_then_recover() {
        let mut tracker = HealthTracker::new(3);
        tracker.record_success();
        assert_eq!(tracker.evaluate(Some(true)).status, HealthStatus::Healthy);

        tracker.record_failure("timeout");
        assert_eq!(tracker.evaluate(Some(true)).status, HealthStatus::Recovering);
        tracker.record_failure("timeout");
        tracker.record_failure("timeout");
        let health = tracker.evaluate(Some(true));
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.detail.contains("3 consecutive"));

        tracker.record_success();
        let health = tracker.evaluate(Some(true));
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.last_round_trip.is_some());
    }

    #[test]
    fn test_reconnecting_wins() {
        let mut tracker = HealthTracker::new(1);
        tracker.record_failure("socket closed");
        tracker.set_reconnecting(true);
        let health = tracker.evaluate(None);
        assert_eq!(health.status, HealthStatus::Recovering);
        assert!(health.detail.contains("socket closed"));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut tracker = HealthTracker::new(2);
        tracker.record_failure("x");
        tracker.reset();
        assert_eq!(tracker.consecutive_failures(), 0);
        assert!(tracker.evaluate(Some(true)).last_round_trip.is_none());
    }
}
