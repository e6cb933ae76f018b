//! Session, connection and health types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for the debugging session (one per server process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one established browser connection.
///
/// Every attach or launch produces a fresh id, so two connections to the same
/// endpoint are still distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote-debugging endpoint of a browser (host and port of the DevTools HTTP server).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,
    /// Remote-debugging port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URL of the `/json/version` discovery document.
    pub fn version_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}/json/version", self.host, self.port)
        } else {
            format!("http://{}:{}/json/version", self.host, self.port)
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("localhost", 9222)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Coarse health of the browser connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected and answering protocol calls
    Healthy,
    /// Not connected, or the transport is known to be broken
    Unhealthy,
    /// Connecting, reconnecting, or degraded but not yet given up on
    Recovering,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Recovering => "recovering",
        };
        f.write_str(name)
    }
}

/// Health report produced by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    /// Overall status
    pub status: HealthStatus,
    /// Human-readable explanation
    pub detail: String,
    /// Time of the last successful protocol round-trip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_round_trip: Option<DateTime<Utc>>,
}

impl ConnectionHealth {
    /// Health of a process that has never connected.
    pub fn disconnected() -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: "no browser connection".to_string(),
            last_round_trip: None,
        }
    }

    /// Whether the status is healthy.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Session-level diagnostic summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session identifier
    pub session_id: SessionId,
    /// Seconds since the session was created
    pub uptime: u64,
    /// Time of the last reconciliation or mutation
    pub last_activity: DateTime<Utc>,
    /// Health status copied from the connection manager
    pub connection_health: HealthStatus,
}
