//! Per-device bootstrap session state.
//!
//! A [`BootstrapSession`] is created by
//! [`SessionOrchestrator::begin`](crate::orchestrator::SessionOrchestrator::begin)
//! and mutated only by the orchestrator; its mutators are crate-private so the
//! transport layer can read progress but cannot reorder or replay work.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::TaskBatch;
use crate::identity::{DeviceIdentity, EndpointName};
use crate::operation::{Outcome, ProvisioningOperation};

/// Opaque handle the transport layer uses to refer to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a bootstrap session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session exists, no provisioning work absorbed yet.
    Created,
    /// Operations are being exchanged with the device.
    InProgress,
    /// The device acknowledged the finish marker.
    Finished,
    /// The exchange was aborted.
    Failed,
}

impl SessionState {
    /// Returns true if the session has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Object definitions applicable to one device: object id -> version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectModel {
    objects: BTreeMap<u16, String>,
}

impl ObjectModel {
    pub fn new(objects: BTreeMap<u16, String>) -> Self {
        Self { objects }
    }

    /// Builder-style registration of a supported object.
    pub fn with_object(mut self, object_id: u16, version: impl Into<String>) -> Self {
        self.objects.insert(object_id, version.into());
        self
    }

    pub fn supports(&self, object_id: u16) -> bool {
        self.objects.contains_key(&object_id)
    }

    pub fn version(&self, object_id: u16) -> Option<&str> {
        self.objects.get(&object_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// An operation that was sent together with what the device answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub operation: ProvisioningOperation,
    /// Never a transport failure: those terminate the session unrecorded.
    pub outcome: Outcome,
}

/// Mutable state of one bootstrap exchange.
#[derive(Debug, Clone)]
pub struct BootstrapSession {
    id: SessionId,
    endpoint: EndpointName,
    identity: DeviceIdentity,
    authorized: bool,
    state: SessionState,
    object_model: Option<ObjectModel>,
    pending: VecDeque<ProvisioningOperation>,
    responses: Vec<ExchangeRecord>,
    more_batches: bool,
    finish_issued: bool,
    started_at: DateTime<Utc>,
}

impl BootstrapSession {
    pub(crate) fn new(endpoint: EndpointName, identity: DeviceIdentity, authorized: bool) -> Self {
        Self {
            id: SessionId::new(),
            endpoint,
            identity,
            authorized,
            state: SessionState::Created,
            object_model: None,
            pending: VecDeque::new(),
            responses: Vec::new(),
            more_batches: false,
            finish_issued: false,
            started_at: Utc::now(),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn object_model(&self) -> Option<&ObjectModel> {
        self.object_model.as_ref()
    }

    /// Operations queued but not yet handed to the transport, in send order.
    pub fn pending_operations(&self) -> impl Iterator<Item = &ProvisioningOperation> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Outcomes of every non-finish operation reported so far, in order.
    pub fn responses(&self) -> &[ExchangeRecord] {
        &self.responses
    }

    pub fn has_more_batches(&self) -> bool {
        self.more_batches
    }

    /// Whether the finish marker has been handed out.
    pub fn finish_issued(&self) -> bool {
        self.finish_issued
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // ── Orchestrator-only mutation ────────────────────────────────────────

    /// Replace the queue with a freshly fetched batch.
    ///
    /// The response log is reset: a source that needs older responses must
    /// have consumed them when producing this batch.
    pub(crate) fn absorb(&mut self, batch: TaskBatch) {
        if let Some(model) = batch.object_model {
            self.object_model = Some(model);
        }
        self.responses = Vec::with_capacity(batch.operations.len());
        self.pending = batch.operations.into();
        self.more_batches = !batch.last;
        if self.state == SessionState::Created {
            self.state = SessionState::InProgress;
        }
    }

    pub(crate) fn pop_pending(&mut self) -> Option<ProvisioningOperation> {
        self.pending.pop_front()
    }

    pub(crate) fn record(&mut self, operation: ProvisioningOperation, outcome: Outcome) {
        self.responses.push(ExchangeRecord { operation, outcome });
    }

    pub(crate) fn clear_more_batches(&mut self) {
        self.more_batches = false;
    }

    pub(crate) fn mark_finish_issued(&mut self) {
        self.finish_issued = true;
    }

    /// Enter a terminal state and drop any queued work.
    pub(crate) fn terminate(&mut self, state: SessionState) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.pending.clear();
        self.more_batches = false;
    }
}
