//! Batches of provisioning work and the source that produces them.

use crate::operation::ProvisioningOperation;
use crate::session::{BootstrapSession, ExchangeRecord, ObjectModel};

/// An ordered group of operations returned together by a [`TaskBatchSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBatch {
    /// Operations in send order.
    pub operations: Vec<ProvisioningOperation>,
    /// Object definitions for the device, if this batch establishes them.
    pub object_model: Option<ObjectModel>,
    /// No further batch will follow.
    pub last: bool,
}

impl TaskBatch {
    pub fn new(operations: Vec<ProvisioningOperation>, last: bool) -> Self {
        Self {
            operations,
            object_model: None,
            last,
        }
    }

    pub fn with_object_model(mut self, model: ObjectModel) -> Self {
        self.object_model = Some(model);
        self
    }
}

/// Produces the provisioning work for a session.
///
/// Called once with `prior = None` for the initial batch, then again with the
/// responses recorded since the previous batch whenever the queue drains and
/// the previous batch was not `last`. Returning `None` means there is no
/// (more) work.
///
/// # Blocking
///
/// Implementations may block (e.g. to read templates). Async callers should
/// invoke the orchestrator from a blocking-capable thread.
///
/// # Contract
///
/// A batch with no operations must be `last`. An empty non-last batch is
/// rejected by the orchestrator with
/// [`OrchestratorError::EmptyBatch`](crate::OrchestratorError::EmptyBatch).
pub trait TaskBatchSource: Send + Sync {
    fn next_batch(
        &self,
        session: &BootstrapSession,
        prior: Option<&[ExchangeRecord]>,
    ) -> Option<TaskBatch>;
}
