//! Audit trail of bootstrap progress, keyed by endpoint name.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::EndpointName;

/// Severity prefix of an audit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Session lifecycle
    /// An authorized device opened a session.
    SessionStarted,
    /// The transport closed a completed exchange.
    SessionFinished,
    /// The transport or orchestrator aborted the exchange.
    SessionFailed,

    // Per-operation
    /// Device answered an operation with a success code.
    OperationSucceeded,
    /// Device answered an operation with an error code.
    OperationRejected,
    /// Operation could not be delivered or its response was unusable.
    OperationFailed,

    // Finish marker
    /// Device acknowledged the finish marker.
    FinishAcknowledged,
    /// Device rejected the finish marker.
    FinishRejected,
}

impl AuditAction {
    /// Actions that close out a session's audit trail.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionFinished | Self::SessionFailed)
    }
}

/// One audit notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred.
    pub ts: DateTime<Utc>,
    /// Device the notice is about.
    pub endpoint: EndpointName,
    pub level: AuditLevel,
    pub action: AuditAction,
    /// Human-readable detail, without the level prefix.
    pub message: String,
}

impl AuditEvent {
    /// Create a new audit event with the current timestamp.
    pub fn new(
        endpoint: EndpointName,
        level: AuditLevel,
        action: AuditAction,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            endpoint,
            level,
            action,
            message: message.into(),
        }
    }

    pub fn info(endpoint: EndpointName, action: AuditAction, message: impl Into<String>) -> Self {
        Self::new(endpoint, AuditLevel::Info, action, message)
    }

    pub fn error(endpoint: EndpointName, action: AuditAction, message: impl Into<String>) -> Self {
        Self::new(endpoint, AuditLevel::Error, action, message)
    }
}

impl fmt::Display for AuditEvent {
    /// Renders as `<level>: <message>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level.as_str(), self.message)
    }
}

/// Receives audit notices.
///
/// # Contract
///
/// Fire-and-forget. Implementations must not block for long, must never
/// panic on delivery failure, and must be safe to call concurrently from
/// many sessions.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}
