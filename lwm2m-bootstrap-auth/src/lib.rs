//! Bootstrap authorization for LwM2M devices.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Credential lookups are injected via [`CredentialStore`]; the resulting
//! [`SecurityAuthorizer`] plugs into
//! [`SessionOrchestrator`](lwm2m_bootstrap_core::SessionOrchestrator) as its
//! [`Authorizer`](lwm2m_bootstrap_core::Authorizer).
//!
//! # Example
//!
//! ```ignore
//! use lwm2m_bootstrap_auth::SecurityAuthorizer;
//! use lwm2m_bootstrap_core::{DeviceIdentity, EndpointName};
//!
//! let authorizer = SecurityAuthorizer::new(store);
//! let ok = authorizer.is_authorized(
//!     &EndpointName::new("sensor-1"),
//!     &DeviceIdentity::psk("sensor-1-key"),
//! );
//! ```

pub mod authorizer;
pub mod checker;
pub mod error;
pub mod security;

pub use authorizer::{CredentialStore, SecurityAuthorizer};
pub use error::CredentialStoreError;
pub use security::{Credential, SecurityInfo};
