//! # LwM2M Bootstrap Core
//!
//! Domain types and the session state machine for provisioning LwM2M
//! devices during bootstrap.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No CoAP/DTLS handling
//!
//! Collaborators are injected via traits:
//! - [`Authorizer`] - Decides whether a device may bootstrap
//! - [`TaskBatchSource`] - Produces the provisioning work, batch by batch
//! - [`AuditSink`] - Receives the per-device audit trail
//!
//! Persistence of credentials and provisioning templates, the transport, and
//! the async runtime live in `lwm2m-bootstrap-server`.
//!
//! ## Modules
//!
//! - [`identity`] - Endpoint names and device credentials
//! - [`operation`] - Provisioning operations and device responses
//! - [`session`] - Per-device session state
//! - [`batch`] - Task batches and their source
//! - [`orchestrator`] - The bootstrap state machine
//! - [`audit`] - Audit trail types

pub mod audit;
pub mod batch;
pub mod error;
pub mod identity;
pub mod operation;
pub mod orchestrator;
pub mod session;

pub use audit::{AuditAction, AuditEvent, AuditLevel, AuditSink};
pub use batch::{TaskBatch, TaskBatchSource};
pub use error::{AuthorizerError, OrchestratorError};
pub use identity::{DeviceIdentity, EndpointName};
pub use operation::{
    DeviceResponse, ObjectLink, ObjectPath, Outcome, ProvisioningOperation, ResourceValue,
    ResponseCode, SECURITY_OBJECT_ID, SERVER_OBJECT_ID,
};
pub use orchestrator::{
    Authorizer, BootstrapPolicy, FailureCause, OrchestratorConfig, SessionOrchestrator,
};
pub use session::{BootstrapSession, ExchangeRecord, ObjectModel, SessionId, SessionState};
