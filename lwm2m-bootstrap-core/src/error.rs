//! Orchestration error types.

use crate::identity::EndpointName;
use crate::session::SessionState;

/// Contract violations by the caller or by a collaborator.
///
/// Protocol-level disagreements (error responses, transport failures, missing
/// configuration) are never errors; they are expressed through
/// [`BootstrapPolicy`](crate::BootstrapPolicy) and booleans.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The session was refused at `begin` and must not make progress.
    #[error("session for endpoint {endpoint} is not authorized")]
    Unauthorized { endpoint: EndpointName },

    /// The call is not valid in the session's current state.
    #[error("cannot call {call} on a session in state {state:?}")]
    InvalidState {
        state: SessionState,
        call: &'static str,
    },

    /// The task source returned a batch with no operations that was not last.
    #[error("task source returned an empty non-final batch for endpoint {endpoint}")]
    EmptyBatch { endpoint: EndpointName },
}

/// An authorizer could not reach a decision.
///
/// The orchestrator reduces this to a refusal; it is never surfaced to the
/// transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authorization lookup failed: {0}")]
pub struct AuthorizerError(pub String);

impl AuthorizerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
