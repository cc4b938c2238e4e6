//! Audit sinks.
//!
//! [`TracingAuditSink`] is the default; [`ChannelAuditSink`] hands events to
//! an async consumer, [`MemoryAuditSink`] keeps them for inspection and
//! [`FanoutAuditSink`] combines several.

use std::sync::{Arc, Mutex};

use lwm2m_bootstrap_core::{AuditEvent, AuditLevel, AuditSink, EndpointName};
use tokio::sync::mpsc;

/// Emits every audit event as a `tracing` event at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        match event.level {
            AuditLevel::Info => tracing::info!(
                target: "lwm2m_bootstrap::audit",
                endpoint = %event.endpoint,
                action = ?event.action,
                "{}",
                event.message
            ),
            AuditLevel::Error => tracing::error!(
                target: "lwm2m_bootstrap::audit",
                endpoint = %event.endpoint,
                action = ?event.action,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    pub fn for_endpoint(&self, endpoint: &EndpointName) -> Vec<AuditEvent> {
        self.lock()
            .iter()
            .filter(|e| e.endpoint == *endpoint)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panicking reader cannot leave the Vec half-written.
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.lock().push(event.clone());
    }
}

/// Forwards events over a bounded channel. Events are dropped, with a
/// warning, when the consumer falls behind or has gone away.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// A `capacity` of zero is treated as one.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            tracing::warn!(
                endpoint = %event.endpoint,
                reason,
                "Dropping audit event"
            );
        }
    }
}

/// Delivers each event to every inner sink, in order.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl std::fmt::Debug for FanoutAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutAuditSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: &AuditEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
