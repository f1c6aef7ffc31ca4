//! Security-audit events.
//!
//! Events are structured records with UTC timestamps, emitted to a
//! pluggable sink: stdout JSON lines in development, a SIEM forwarder in
//! production (implement [`AuditSink`] and hand it to the container).

use crate::models::{ProjectId, QueryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine activity.
    Info,
    /// Unusual but not dangerous.
    Warning,
    /// Requires attention.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A structured security-audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Event type, e.g. `query_executed`, `injection_blocked`.
    pub event_type: String,
    /// Owning project.
    pub project_id: Option<ProjectId>,
    /// The approved query involved, if any.
    pub query_id: Option<QueryId>,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// Client IP, when known.
    pub client_ip: Option<String>,
    /// Severity.
    pub severity: Severity,
    /// Free-form structured details.
    pub details: serde_json::Value,
}

impl AuditEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(event_type: impl Into<String>, severity: Severity) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            project_id: None,
            query_id: None,
            user_id: None,
            client_ip: None,
            severity,
            details: serde_json::Value::Null,
        }
    }

    /// Sets the project.
    #[must_use]
    pub const fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Sets the query.
    #[must_use]
    pub const fn with_query(mut self, query_id: QueryId) -> Self {
        self.query_id = Some(query_id);
        self
    }

    /// Sets the details payload.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Emits one event. Must not fail the calling operation.
    fn emit(&self, event: &AuditEvent);
}

/// Writes events as JSON lines to stdout. Development default.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl AuditSink for StdoutSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    }
}

/// Routes events through `tracing` at a level matching their severity.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, event: &AuditEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        match event.severity {
            Severity::Info => tracing::info!(target: "audit", event = %payload),
            Severity::Warning => tracing::warn!(target: "audit", event = %payload),
            Severity::Critical => tracing::error!(target: "audit", event = %payload),
        }
    }
}

/// Collects events in memory. For tests and embedders that forward
/// batches themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of collected events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialises_with_utc_timestamp() {
        let event = AuditEvent::new("injection_blocked", Severity::Critical)
            .with_details(serde_json::json!({"fingerprint": "s&1c"}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "injection_blocked");
        assert_eq!(json["severity"], "critical");
        // RFC 3339 with explicit offset
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.emit(&AuditEvent::new("query_executed", Severity::Info));
        sink.emit(&AuditEvent::new("injection_blocked", Severity::Critical));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].severity, Severity::Critical);
    }
}
