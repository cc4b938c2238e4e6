//! LwM2M bootstrap server runtime.
//!
//! Wires the pure state machine from `lwm2m-bootstrap-core` and the
//! credential checks from `lwm2m-bootstrap-auth` to concrete stores:
//!
//! - [`config`] - TOML server configuration
//! - [`bootstrap_config`] - Provisioning templates and their store
//! - [`credentials`] - In-memory credential store
//! - [`task_provider`] - Turns templates into task batches
//! - [`audit`] - Audit sinks
//! - [`registry`] / [`service`] - Async session handling for transports
//! - [`simulate`] - Scripted device for dry runs

pub mod audit;
pub mod bootstrap_config;
pub mod config;
pub mod credentials;
pub mod registry;
pub mod service;
pub mod simulate;
pub mod task_provider;

pub use audit::{ChannelAuditSink, FanoutAuditSink, MemoryAuditSink, TracingAuditSink};
pub use bootstrap_config::{BootstrapConfig, BootstrapConfigStore};
pub use config::{ConfigError, ServerConfig};
pub use credentials::InMemorySecurityStore;
pub use service::{BootstrapService, ServiceError, SessionStart, Stores};
pub use simulate::{run_simulation, Fault, SimulatedDevice, SimulationOutcome, SimulationReport};
pub use task_provider::ConfigStoreTaskProvider;
