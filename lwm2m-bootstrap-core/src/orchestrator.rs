//! Bootstrap session state machine.
//!
//! ```text
//! begin ──► Created ──has_work──► InProgress ──finish acked──► Finished
//!                                     │
//!                                     ├──finish rejected──────► Failed
//!                                     └──transport failure────► Failed
//! ```
//!
//! Error responses to ordinary operations are recorded and the exchange moves
//! on; only the outcome of the finish marker, or a transport failure, ends a
//! session.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditEvent, AuditLevel, AuditSink};
use crate::batch::{TaskBatch, TaskBatchSource};
use crate::error::{AuthorizerError, OrchestratorError};
use crate::identity::{DeviceIdentity, EndpointName};
use crate::operation::{DeviceResponse, Outcome, ProvisioningOperation};
use crate::session::{BootstrapSession, SessionState};

/// Decides whether a connecting device may bootstrap.
///
/// # Thread Safety
///
/// Shared by every session; lookups must be safe to run concurrently.
pub trait Authorizer: Send + Sync {
    /// `Ok(false)` is a refusal; `Err` means no decision could be reached,
    /// which the orchestrator also treats as a refusal.
    fn authorize(
        &self,
        endpoint: &EndpointName,
        identity: &DeviceIdentity,
    ) -> Result<bool, AuthorizerError>;
}

/// What the transport layer must do after reporting an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapPolicy {
    /// Send this operation next.
    Continue(ProvisioningOperation),
    /// The device acknowledged the finish marker; close the exchange.
    Finished,
    /// Abort the exchange.
    Failed,
}

impl BootstrapPolicy {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue(_))
    }

    /// The operation to send next, if the exchange continues.
    pub fn next_operation(&self) -> Option<&ProvisioningOperation> {
        match self {
            Self::Continue(op) => Some(op),
            _ => None,
        }
    }
}

/// Why a session was terminated, as reported to [`SessionOrchestrator::on_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCause {
    /// The device identity was refused.
    Unauthorized,
    /// No provisioning configuration applies to the device.
    NoBootstrapConfig,
    /// The provisioning configuration could not be turned into operations.
    InvalidConfig,
    /// An operation could not be delivered.
    RequestFailed,
    /// The device rejected the finish marker.
    FinishFailed,
    /// A contract violation inside the server.
    InternalError,
    /// The transport stopped the exchange.
    Cancelled,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NoBootstrapConfig => "NO_BOOTSTRAP_CONFIG",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::FinishFailed => "FINISH_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Orchestrator behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Reject every progress call on a session refused at `begin`.
    ///
    /// Disable only when the transport layer checks
    /// [`BootstrapSession::is_authorized`] itself before calling `has_work`.
    pub enforce_authorization: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enforce_authorization: true,
        }
    }
}

/// Drives bootstrap sessions from `begin` to a terminal state.
///
/// Holds no per-session state: any number of sessions may be driven through
/// one orchestrator concurrently, as long as calls for a single session are
/// serialized by its owner.
pub struct SessionOrchestrator {
    authorizer: Arc<dyn Authorizer>,
    tasks: Arc<dyn TaskBatchSource>,
    audit: Arc<dyn AuditSink>,
    config: OrchestratorConfig,
}

impl fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("config", &self.config)
            .finish()
    }
}

impl SessionOrchestrator {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        tasks: Arc<dyn TaskBatchSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            authorizer,
            tasks,
            audit,
            config: OrchestratorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ── Session setup ─────────────────────────────────────────────────────

    /// Open a session for a newly connected device.
    ///
    /// Always returns a session; refused devices get `is_authorized() == false`
    /// and no audit entry.
    pub fn begin(&self, endpoint: EndpointName, identity: DeviceIdentity) -> BootstrapSession {
        let authorized = match self.authorizer.authorize(&endpoint, &identity) {
            Ok(authorized) => authorized,
            Err(e) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    identity = identity.kind(),
                    error = %e,
                    "Authorization lookup failed, refusing bootstrap"
                );
                false
            }
        };

        let session = BootstrapSession::new(endpoint, identity, authorized);
        if authorized {
            self.audit(
                &session,
                AuditLevel::Info,
                AuditAction::SessionStarted,
                "Bootstrap session started...".to_string(),
            );
        } else {
            tracing::info!(
                endpoint = %session.endpoint(),
                identity = session.identity().kind(),
                "Bootstrap refused"
            );
        }
        session
    }

    /// Fetch the first batch of work.
    ///
    /// Returns `false` when no provisioning configuration applies to the
    /// device; the transport should then reject the bootstrap.
    pub fn has_work(&self, session: &mut BootstrapSession) -> Result<bool, OrchestratorError> {
        self.check_authorized(session)?;
        if session.state() != SessionState::Created {
            return Err(OrchestratorError::InvalidState {
                state: session.state(),
                call: "has_work",
            });
        }

        match self.tasks.next_batch(session, None) {
            None => {
                tracing::debug!(endpoint = %session.endpoint(), "No bootstrap configuration");
                Ok(false)
            }
            Some(batch) => {
                self.absorb(session, batch)?;
                Ok(true)
            }
        }
    }

    /// The very first operation to send once [`has_work`](Self::has_work)
    /// returned `true`.
    pub fn first_operation(
        &self,
        session: &mut BootstrapSession,
    ) -> Result<ProvisioningOperation, OrchestratorError> {
        self.next_operation(session)
    }

    /// Pop the next queued operation, refilling from the task source when the
    /// queue drains, or hand out the finish marker when no work remains.
    ///
    /// Terminal sessions keep yielding the finish marker and never consult the
    /// task source again.
    pub fn next_operation(
        &self,
        session: &mut BootstrapSession,
    ) -> Result<ProvisioningOperation, OrchestratorError> {
        self.check_authorized(session)?;
        match session.state() {
            SessionState::Created => {
                return Err(OrchestratorError::InvalidState {
                    state: SessionState::Created,
                    call: "next_operation",
                });
            }
            state if state.is_terminal() => return Ok(ProvisioningOperation::Finish),
            _ => {}
        }

        loop {
            if let Some(op) = session.pop_pending() {
                return Ok(op);
            }
            if !session.has_more_batches() {
                break;
            }
            match self.tasks.next_batch(session, Some(session.responses())) {
                None => {
                    session.clear_more_batches();
                    break;
                }
                // absorb() rejects empty non-final batches, so every pass
                // either pops, stops, or clears the flag.
                Some(batch) => self.absorb(session, batch)?,
            }
        }

        session.mark_finish_issued();
        Ok(ProvisioningOperation::Finish)
    }

    // ── Outcome handling ──────────────────────────────────────────────────

    /// The device answered `operation` with a success code.
    pub fn on_success(
        &self,
        session: &mut BootstrapSession,
        operation: ProvisioningOperation,
        response: DeviceResponse,
    ) -> Result<BootstrapPolicy, OrchestratorError> {
        self.check_reportable(session, "on_success")?;
        Self::check_finish_issued(session, &operation, "on_success")?;

        if operation.is_finish() {
            self.audit(
                session,
                AuditLevel::Info,
                AuditAction::FinishAcknowledged,
                "receives success response for bootstrap finish.".to_string(),
            );
            session.terminate(SessionState::Finished);
            return Ok(BootstrapPolicy::Finished);
        }

        let message = format!("receives success response for: {operation} {response}");
        session.record(operation, Outcome::Success(response));
        self.audit(
            session,
            AuditLevel::Info,
            AuditAction::OperationSucceeded,
            message,
        );
        Ok(BootstrapPolicy::Continue(self.next_operation(session)?))
    }

    /// The device answered `operation` with an error code.
    ///
    /// Ordinary operations are recorded and the exchange continues; a
    /// rejected finish marker fails the session.
    pub fn on_error_response(
        &self,
        session: &mut BootstrapSession,
        operation: ProvisioningOperation,
        response: DeviceResponse,
    ) -> Result<BootstrapPolicy, OrchestratorError> {
        self.check_reportable(session, "on_error_response")?;
        Self::check_finish_issued(session, &operation, "on_error_response")?;

        if operation.is_finish() {
            self.audit(
                session,
                AuditLevel::Error,
                AuditAction::FinishRejected,
                format!(
                    "error response for request bootstrap finish. Stop the session: {} ({response})",
                    session.id()
                ),
            );
            session.terminate(SessionState::Failed);
            return Ok(BootstrapPolicy::Failed);
        }

        let message = format!("{operation} receives error response {response}");
        session.record(operation, Outcome::ErrorResponse(response));
        self.audit(
            session,
            AuditLevel::Info,
            AuditAction::OperationRejected,
            message,
        );
        Ok(BootstrapPolicy::Continue(self.next_operation(session)?))
    }

    /// `operation` could not be delivered or its response was unusable.
    ///
    /// Always terminal, whatever was in flight. Nothing is recorded in the
    /// response log. A session that already ended keeps its outcome and is
    /// not audited again; neither is a refused session.
    pub fn on_transport_failure(
        &self,
        session: &mut BootstrapSession,
        operation: &ProvisioningOperation,
        cause: &str,
    ) -> BootstrapPolicy {
        match session.state() {
            SessionState::Finished => return BootstrapPolicy::Finished,
            SessionState::Failed => return BootstrapPolicy::Failed,
            _ => {}
        }
        if self.check_authorized(session).is_err() {
            tracing::warn!(
                endpoint = %session.endpoint(),
                %operation,
                cause,
                "Transport failure on unauthorized session"
            );
            session.terminate(SessionState::Failed);
            return BootstrapPolicy::Failed;
        }

        self.audit(
            session,
            AuditLevel::Error,
            AuditAction::OperationFailed,
            format!("{operation} failed because of {cause}"),
        );
        session.terminate(SessionState::Failed);
        BootstrapPolicy::Failed
    }

    /// Dispatch a reported [`Outcome`] to the matching callback.
    pub fn report(
        &self,
        session: &mut BootstrapSession,
        operation: ProvisioningOperation,
        outcome: Outcome,
    ) -> Result<BootstrapPolicy, OrchestratorError> {
        match outcome {
            Outcome::Success(response) => self.on_success(session, operation, response),
            Outcome::ErrorResponse(response) => {
                self.on_error_response(session, operation, response)
            }
            Outcome::TransportFailure(cause) => {
                Ok(self.on_transport_failure(session, &operation, &cause))
            }
        }
    }

    // ── Observational ─────────────────────────────────────────────────────

    /// The transport closed a completed exchange.
    pub fn end(&self, session: &BootstrapSession) {
        let elapsed = chrono::Utc::now() - session.started_at();
        tracing::debug!(
            endpoint = %session.endpoint(),
            elapsed_ms = elapsed.num_milliseconds(),
            "Bootstrap exchange complete"
        );
        self.audit(
            session,
            AuditLevel::Info,
            AuditAction::SessionFinished,
            "Bootstrap session finished.".to_string(),
        );
    }

    /// The transport or this orchestrator aborted the exchange.
    pub fn on_failed(&self, session: &BootstrapSession, cause: FailureCause) {
        self.audit(
            session,
            AuditLevel::Error,
            AuditAction::SessionFailed,
            format!("Bootstrap session failed because of {cause}"),
        );
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn absorb(
        &self,
        session: &mut BootstrapSession,
        batch: TaskBatch,
    ) -> Result<(), OrchestratorError> {
        if batch.operations.is_empty() && !batch.last {
            return Err(OrchestratorError::EmptyBatch {
                endpoint: session.endpoint().clone(),
            });
        }
        tracing::debug!(
            endpoint = %session.endpoint(),
            operations = batch.operations.len(),
            last = batch.last,
            "Absorbing task batch"
        );
        session.absorb(batch);
        Ok(())
    }

    fn check_authorized(&self, session: &BootstrapSession) -> Result<(), OrchestratorError> {
        if self.config.enforce_authorization && !session.is_authorized() {
            return Err(OrchestratorError::Unauthorized {
                endpoint: session.endpoint().clone(),
            });
        }
        Ok(())
    }

    fn check_reportable(
        &self,
        session: &BootstrapSession,
        call: &'static str,
    ) -> Result<(), OrchestratorError> {
        self.check_authorized(session)?;
        match session.state() {
            SessionState::InProgress => Ok(()),
            state => Err(OrchestratorError::InvalidState { state, call }),
        }
    }

    /// The finish marker may only be reported once it was handed out.
    fn check_finish_issued(
        session: &BootstrapSession,
        operation: &ProvisioningOperation,
        call: &'static str,
    ) -> Result<(), OrchestratorError> {
        if operation.is_finish() && !session.finish_issued() {
            return Err(OrchestratorError::InvalidState {
                state: session.state(),
                call,
            });
        }
        Ok(())
    }

    fn audit(
        &self,
        session: &BootstrapSession,
        level: AuditLevel,
        action: AuditAction,
        message: String,
    ) {
        let event = AuditEvent::new(session.endpoint().clone(), level, action, message);
        self.audit.record(&event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::operation::{ObjectPath, ResponseCode};
    use crate::session::ExchangeRecord;

    // ── Test doubles ──────────────────────────────────────────────────────

    struct StaticAuthorizer(Result<bool, AuthorizerError>);

    impl Authorizer for StaticAuthorizer {
        fn authorize(&self, _: &EndpointName, _: &DeviceIdentity) -> Result<bool, AuthorizerError> {
            self.0.clone()
        }
    }

    /// Hands out pre-scripted batches and remembers what it was asked with.
    #[derive(Default)]
    struct ScriptedSource {
        batches: Mutex<VecDeque<Option<TaskBatch>>>,
        calls: Mutex<Vec<Option<Vec<ExchangeRecord>>>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Option<TaskBatch>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Option<Vec<ExchangeRecord>>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TaskBatchSource for ScriptedSource {
        fn next_batch(
            &self,
            _session: &BootstrapSession,
            prior: Option<&[ExchangeRecord]>,
        ) -> Option<TaskBatch> {
            self.calls.lock().unwrap().push(prior.map(<[_]>::to_vec));
            self.batches.lock().unwrap().pop_front().flatten()
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<AuditEvent>>);

    impl RecordingSink {
        fn events(&self) -> Vec<AuditEvent> {
            self.0.lock().unwrap().clone()
        }

        fn actions(&self) -> Vec<AuditAction> {
            self.events().iter().map(|e| e.action).collect()
        }
    }

    impl AuditSink for RecordingSink {
        fn record(&self, event: &AuditEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct Harness {
        orchestrator: SessionOrchestrator,
        source: Arc<ScriptedSource>,
        sink: Arc<RecordingSink>,
    }

    fn harness_with(auth: Result<bool, AuthorizerError>, batches: Vec<Option<TaskBatch>>) -> Harness {
        let source = Arc::new(ScriptedSource::new(batches));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = SessionOrchestrator::new(
            Arc::new(StaticAuthorizer(auth)),
            source.clone(),
            sink.clone(),
        );
        Harness {
            orchestrator,
            source,
            sink,
        }
    }

    fn harness(batches: Vec<Option<TaskBatch>>) -> Harness {
        harness_with(Ok(true), batches)
    }

    fn write(instance: u16) -> ProvisioningOperation {
        ProvisioningOperation::Write {
            path: ObjectPath::instance(0, instance),
            resources: Default::default(),
        }
    }

    fn changed() -> DeviceResponse {
        DeviceResponse::new(ResponseCode::Changed)
    }

    fn bad_request() -> DeviceResponse {
        DeviceResponse::new(ResponseCode::BadRequest)
    }

    fn begin(h: &Harness) -> BootstrapSession {
        h.orchestrator
            .begin(EndpointName::new("sensor-1"), DeviceIdentity::psk("sensor-1-key"))
    }

    // ── begin ─────────────────────────────────────────────────────────────

    #[test]
    fn begin_authorized_audits_start() {
        let h = harness(vec![]);
        let session = begin(&h);

        assert!(session.is_authorized());
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(h.sink.actions(), vec![AuditAction::SessionStarted]);
        assert_eq!(h.sink.events()[0].endpoint, EndpointName::new("sensor-1"));
    }

    #[test]
    fn begin_refused_records_nothing() {
        let h = harness_with(Ok(false), vec![]);
        let session = begin(&h);

        assert!(!session.is_authorized());
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn begin_authorizer_error_is_refusal() {
        let h = harness_with(Err(AuthorizerError::new("store offline")), vec![]);
        let session = begin(&h);

        assert!(!session.is_authorized());
        assert!(h.sink.events().is_empty());
    }

    // ── has_work ──────────────────────────────────────────────────────────

    #[test]
    fn has_work_false_without_config() {
        let h = harness(vec![None]);
        let mut session = begin(&h);

        assert!(!h.orchestrator.has_work(&mut session).unwrap());
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(h.source.calls(), vec![None]);
    }

    #[test]
    fn has_work_absorbs_first_batch() {
        let model = crate::session::ObjectModel::default().with_object(0, "1.1");
        let h = harness(vec![Some(
            TaskBatch::new(vec![write(0), write(1)], false).with_object_model(model.clone()),
        )]);
        let mut session = begin(&h);

        assert!(h.orchestrator.has_work(&mut session).unwrap());
        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.pending_len(), 2);
        assert!(session.has_more_batches());
        assert_eq!(session.object_model(), Some(&model));
    }

    #[test]
    fn has_work_twice_is_rejected() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0)], true))]);
        let mut session = begin(&h);
        h.orchestrator.has_work(&mut session).unwrap();

        let err = h.orchestrator.has_work(&mut session).unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidState {
                state: SessionState::InProgress,
                call: "has_work",
            }
        );
    }

    // ── Scenario B: single batch, all succeed ─────────────────────────────

    #[test]
    fn single_batch_runs_to_finished() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0), write(1)], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        assert!(o.has_work(&mut session).unwrap());
        let op1 = o.first_operation(&mut session).unwrap();
        assert_eq!(op1, write(0));

        let policy = o.on_success(&mut session, op1, changed()).unwrap();
        assert_eq!(policy, BootstrapPolicy::Continue(write(1)));

        let policy = o.on_success(&mut session, write(1), changed()).unwrap();
        assert_eq!(policy, BootstrapPolicy::Continue(ProvisioningOperation::Finish));
        assert!(session.finish_issued());

        let policy = o
            .on_success(&mut session, ProvisioningOperation::Finish, changed())
            .unwrap();
        assert_eq!(policy, BootstrapPolicy::Finished);
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(session.responses().len(), 2);

        assert_eq!(
            h.sink.actions(),
            vec![
                AuditAction::SessionStarted,
                AuditAction::OperationSucceeded,
                AuditAction::OperationSucceeded,
                AuditAction::FinishAcknowledged,
            ]
        );
        // Single last batch: the source is never asked again.
        assert_eq!(h.source.calls().len(), 1);
    }

    // ── Scenario C: error response does not abort ─────────────────────────

    #[test]
    fn error_response_continues_exchange() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0), write(1)], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let op1 = o.first_operation(&mut session).unwrap();

        let policy = o.on_error_response(&mut session, op1, bad_request()).unwrap();
        assert_eq!(policy, BootstrapPolicy::Continue(write(1)));
        assert_eq!(session.responses().len(), 1);
        assert_eq!(
            session.responses()[0].outcome,
            Outcome::ErrorResponse(bad_request())
        );

        let policy = o.on_success(&mut session, write(1), changed()).unwrap();
        assert_eq!(policy, BootstrapPolicy::Continue(ProvisioningOperation::Finish));

        let policy = o
            .on_success(&mut session, ProvisioningOperation::Finish, changed())
            .unwrap();
        assert_eq!(policy, BootstrapPolicy::Finished);
        assert!(h.sink.actions().contains(&AuditAction::OperationRejected));
    }

    // ── Scenario D: transparent refill ────────────────────────────────────

    #[test]
    fn drained_queue_fetches_next_batch_with_responses() {
        let h = harness(vec![
            Some(TaskBatch::new(vec![write(0)], false)),
            Some(TaskBatch::new(vec![write(1)], true)),
        ]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let op1 = o.first_operation(&mut session).unwrap();
        assert_eq!(op1, write(0));

        let policy = o.on_success(&mut session, op1, changed()).unwrap();
        assert_eq!(policy, BootstrapPolicy::Continue(write(1)));

        let calls = h.source.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], None);
        let prior = calls[1].as_ref().unwrap();
        assert_eq!(prior.len(), 1);
        assert_eq!(prior[0].operation, write(0));
        assert!(prior[0].outcome.is_success());

        assert!(!session.has_more_batches());
        // The log restarts with the new batch.
        assert!(session.responses().is_empty());
    }

    #[test]
    fn exhausted_source_mid_exchange_yields_finish() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0)], false)), None]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let op1 = o.first_operation(&mut session).unwrap();
        let policy = o.on_success(&mut session, op1, changed()).unwrap();

        assert_eq!(policy, BootstrapPolicy::Continue(ProvisioningOperation::Finish));
        assert!(!session.has_more_batches());
    }

    #[test]
    fn empty_last_batch_goes_straight_to_finish() {
        let h = harness(vec![Some(TaskBatch::new(vec![], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        assert!(o.has_work(&mut session).unwrap());
        assert_eq!(
            o.first_operation(&mut session).unwrap(),
            ProvisioningOperation::Finish
        );
    }

    #[test]
    fn empty_non_last_batch_fails_fast() {
        let h = harness(vec![
            Some(TaskBatch::new(vec![write(0)], false)),
            Some(TaskBatch::new(vec![], false)),
            Some(TaskBatch::new(vec![], false)),
        ]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let op1 = o.first_operation(&mut session).unwrap();
        let err = o.on_success(&mut session, op1, changed()).unwrap_err();

        assert!(matches!(err, OrchestratorError::EmptyBatch { .. }));
        assert_eq!(h.source.calls().len(), 2);
    }

    #[test]
    fn empty_non_last_first_batch_is_rejected() {
        let h = harness(vec![Some(TaskBatch::new(vec![], false))]);
        let mut session = begin(&h);

        let err = h.orchestrator.has_work(&mut session).unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptyBatch { .. }));
    }

    // ── Finish marker outcomes ────────────────────────────────────────────

    #[test]
    fn rejected_finish_fails_session() {
        let h = harness(vec![Some(TaskBatch::new(vec![], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let finish = o.first_operation(&mut session).unwrap();
        let policy = o.on_error_response(&mut session, finish, bad_request()).unwrap();

        assert_eq!(policy, BootstrapPolicy::Failed);
        assert_eq!(session.state(), SessionState::Failed);
        // Finish outcomes are never logged.
        assert!(session.responses().is_empty());
        assert_eq!(h.sink.actions().last(), Some(&AuditAction::FinishRejected));
    }

    #[test]
    fn reporting_after_terminal_is_rejected() {
        let h = harness(vec![Some(TaskBatch::new(vec![], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let finish = o.first_operation(&mut session).unwrap();
        o.on_success(&mut session, finish, changed()).unwrap();

        let err = o
            .on_success(&mut session, ProvisioningOperation::Finish, changed())
            .unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidState {
                state: SessionState::Finished,
                call: "on_success",
            }
        );
    }

    #[test]
    fn finish_outcome_before_finish_issued_is_rejected() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0), write(1)], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        o.first_operation(&mut session).unwrap();
        assert!(!session.finish_issued());

        let err = o
            .on_success(&mut session, ProvisioningOperation::Finish, changed())
            .unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidState {
                state: SessionState::InProgress,
                call: "on_success",
            }
        );
        let err = o
            .on_error_response(&mut session, ProvisioningOperation::Finish, bad_request())
            .unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidState {
                state: SessionState::InProgress,
                call: "on_error_response",
            }
        );

        // Queued work is untouched.
        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.pending_len(), 1);
        assert_eq!(h.sink.actions(), vec![AuditAction::SessionStarted]);
    }

    // ── Scenario E: transport failure ─────────────────────────────────────

    #[test]
    fn transport_failure_is_terminal_and_not_logged() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0), write(1)], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let op1 = o.first_operation(&mut session).unwrap();
        let policy = o.on_transport_failure(&mut session, &op1, "timeout");

        assert_eq!(policy, BootstrapPolicy::Failed);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.responses().is_empty());

        // op2 is never resumed.
        for _ in 0..3 {
            assert_eq!(
                o.next_operation(&mut session).unwrap(),
                ProvisioningOperation::Finish
            );
        }
        assert_eq!(session.pending_len(), 0);

        let failure = h.sink.events().pop().unwrap();
        assert_eq!(failure.action, AuditAction::OperationFailed);
        assert_eq!(failure.level, AuditLevel::Error);
        assert!(failure.message.contains("timeout"));
    }

    #[test]
    fn transport_failure_then_on_failed_has_one_terminal_entry() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0)], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let op1 = o.first_operation(&mut session).unwrap();
        o.on_transport_failure(&mut session, &op1, "connection reset");
        o.on_failed(&session, FailureCause::RequestFailed);

        let terminal: Vec<_> = h
            .sink
            .events()
            .into_iter()
            .filter(|e| e.action.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(
            terminal[0].to_string(),
            "error: Bootstrap session failed because of REQUEST_FAILED"
        );
    }

    #[test]
    fn transport_failure_after_finished_keeps_outcome() {
        let h = harness(vec![Some(TaskBatch::new(vec![], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let finish = o.first_operation(&mut session).unwrap();
        o.on_success(&mut session, finish, changed()).unwrap();

        let policy = o.on_transport_failure(&mut session, &ProvisioningOperation::Finish, "late");

        assert_eq!(policy, BootstrapPolicy::Finished);
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(
            h.sink.actions(),
            vec![AuditAction::SessionStarted, AuditAction::FinishAcknowledged]
        );
    }

    #[test]
    fn repeated_transport_failure_is_audited_once() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0)], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let op1 = o.first_operation(&mut session).unwrap();
        o.on_transport_failure(&mut session, &op1, "timeout");
        let policy = o.on_transport_failure(&mut session, &op1, "timeout");

        assert_eq!(policy, BootstrapPolicy::Failed);
        let failures = h
            .sink
            .actions()
            .into_iter()
            .filter(|a| *a == AuditAction::OperationFailed)
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn transport_failure_on_refused_session_is_not_audited() {
        let h = harness_with(Ok(false), vec![Some(TaskBatch::new(vec![write(0)], true))]);
        let mut session = begin(&h);

        let policy = h
            .orchestrator
            .on_transport_failure(&mut session, &write(0), "timeout");

        assert_eq!(policy, BootstrapPolicy::Failed);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn report_dispatches_outcomes() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0), write(1)], true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let op1 = o.first_operation(&mut session).unwrap();
        let policy = o
            .report(&mut session, op1, Outcome::from_response(bad_request()))
            .unwrap();
        assert_eq!(policy, BootstrapPolicy::Continue(write(1)));

        let policy = o
            .report(
                &mut session,
                write(1),
                Outcome::TransportFailure("malformed response".into()),
            )
            .unwrap();
        assert_eq!(policy, BootstrapPolicy::Failed);
        assert_eq!(session.responses().len(), 1);
    }

    // ── Response log accounting ───────────────────────────────────────────

    #[test]
    fn response_log_counts_every_non_finish_outcome() {
        let ops: Vec<_> = (0..5).map(write).collect();
        let h = harness(vec![Some(TaskBatch::new(ops.clone(), true))]);
        let mut session = begin(&h);
        let o = &h.orchestrator;

        o.has_work(&mut session).unwrap();
        let mut current = o.first_operation(&mut session).unwrap();
        let mut reported = 0;
        while !current.is_finish() {
            let policy = if reported % 2 == 0 {
                o.on_success(&mut session, current, changed()).unwrap()
            } else {
                o.on_error_response(&mut session, current, bad_request()).unwrap()
            };
            reported += 1;
            assert_eq!(session.responses().len(), reported);
            current = policy.next_operation().cloned().unwrap();
        }
        assert_eq!(reported, ops.len());
        assert_eq!(session.pending_len(), 0);
        assert!(!session.has_more_batches());
    }

    // ── Contract checks ───────────────────────────────────────────────────

    #[test]
    fn next_operation_before_has_work_is_rejected() {
        let h = harness(vec![]);
        let mut session = begin(&h);

        let err = h.orchestrator.next_operation(&mut session).unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidState {
                state: SessionState::Created,
                call: "next_operation",
            }
        );
    }

    #[test]
    fn unauthorized_session_cannot_progress() {
        let h = harness_with(Ok(false), vec![Some(TaskBatch::new(vec![write(0)], true))]);
        let mut session = begin(&h);

        let err = h.orchestrator.has_work(&mut session).unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthorized { .. }));
        assert!(h.source.calls().is_empty());
    }

    #[test]
    fn unauthorized_session_allowed_when_enforcement_disabled() {
        let h = harness_with(Ok(false), vec![Some(TaskBatch::new(vec![write(0)], true))]);
        let orchestrator = h.orchestrator.with_config(OrchestratorConfig {
            enforce_authorization: false,
        });
        let mut session = orchestrator.begin(EndpointName::new("dev"), DeviceIdentity::psk("k"));

        assert!(orchestrator.has_work(&mut session).unwrap());
        assert_eq!(orchestrator.first_operation(&mut session).unwrap(), write(0));
    }

    // ── Observational calls ───────────────────────────────────────────────

    #[test]
    fn end_and_on_failed_do_not_change_state() {
        let h = harness(vec![Some(TaskBatch::new(vec![write(0)], true))]);
        let mut session = begin(&h);
        h.orchestrator.has_work(&mut session).unwrap();

        h.orchestrator.end(&session);
        h.orchestrator.on_failed(&session, FailureCause::Cancelled);

        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.pending_len(), 1);
        assert_eq!(
            h.sink.actions(),
            vec![
                AuditAction::SessionStarted,
                AuditAction::SessionFinished,
                AuditAction::SessionFailed,
            ]
        );
    }

    #[test]
    fn failure_cause_display_and_serde_agree() {
        for cause in [
            FailureCause::Unauthorized,
            FailureCause::NoBootstrapConfig,
            FailureCause::FinishFailed,
            FailureCause::Cancelled,
        ] {
            let json = serde_json::to_string(&cause).unwrap();
            assert_eq!(json, format!("\"{cause}\""));
        }
    }

    #[test]
    fn policy_helpers() {
        assert!(BootstrapPolicy::Finished.is_terminal());
        assert!(BootstrapPolicy::Failed.is_terminal());
        let next = BootstrapPolicy::Continue(ProvisioningOperation::Finish);
        assert!(!next.is_terminal());
        assert_eq!(next.next_operation(), Some(&ProvisioningOperation::Finish));
    }
}
