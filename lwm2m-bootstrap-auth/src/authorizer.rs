//! Credential-backed [`Authorizer`].

use std::sync::Arc;

use lwm2m_bootstrap_core::{Authorizer, AuthorizerError, DeviceIdentity, EndpointName};

use crate::checker::{check_psk, check_rpk, check_x509};
use crate::error::CredentialStoreError;
use crate::security::SecurityInfo;

/// Lookup side of the credential database.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; lookups run concurrently for every
/// connecting device.
pub trait CredentialStore: Send + Sync {
    /// The record bound to a PSK identity, if any.
    fn get_by_identity(&self, psk_identity: &str)
        -> Result<Option<SecurityInfo>, CredentialStoreError>;

    /// Every record bound to an endpoint.
    fn get_all_by_endpoint(
        &self,
        endpoint: &EndpointName,
    ) -> Result<Vec<SecurityInfo>, CredentialStoreError>;

    /// Whether provisioning configuration exists for the endpoint.
    fn has_bootstrap_config(&self, endpoint: &EndpointName) -> Result<bool, CredentialStoreError>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn get_by_identity(
        &self,
        psk_identity: &str,
    ) -> Result<Option<SecurityInfo>, CredentialStoreError> {
        (**self).get_by_identity(psk_identity)
    }

    fn get_all_by_endpoint(
        &self,
        endpoint: &EndpointName,
    ) -> Result<Vec<SecurityInfo>, CredentialStoreError> {
        (**self).get_all_by_endpoint(endpoint)
    }

    fn has_bootstrap_config(&self, endpoint: &EndpointName) -> Result<bool, CredentialStoreError> {
        (**self).has_bootstrap_config(endpoint)
    }
}

/// Authorizes devices against a [`CredentialStore`].
///
/// - X.509: the certificate common name equals the endpoint and a bootstrap
///   configuration exists.
/// - PSK: the single record bound to the PSK identity validates.
/// - RPK: any record for the endpoint carries the same public key.
#[derive(Debug)]
pub struct SecurityAuthorizer<S> {
    store: S,
}

impl<S: CredentialStore> SecurityAuthorizer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store errors are reported as a refusal.
    pub fn is_authorized(&self, endpoint: &EndpointName, identity: &DeviceIdentity) -> bool {
        self.check(endpoint, identity).unwrap_or(false)
    }

    fn check(
        &self,
        endpoint: &EndpointName,
        identity: &DeviceIdentity,
    ) -> Result<bool, CredentialStoreError> {
        match identity {
            DeviceIdentity::X509 { subject } => {
                Ok(check_x509(endpoint, subject) && self.store.has_bootstrap_config(endpoint)?)
            }
            DeviceIdentity::Psk { identity } => {
                let records: Vec<_> = self.store.get_by_identity(identity)?.into_iter().collect();
                Ok(check_psk(endpoint, identity, &records))
            }
            DeviceIdentity::Rpk { public_key } => {
                let records = self.store.get_all_by_endpoint(endpoint)?;
                Ok(check_rpk(endpoint, public_key, &records))
            }
        }
    }
}

impl<S: CredentialStore> Authorizer for SecurityAuthorizer<S> {
    fn authorize(
        &self,
        endpoint: &EndpointName,
        identity: &DeviceIdentity,
    ) -> Result<bool, AuthorizerError> {
        self.check(endpoint, identity)
            .map_err(|e| AuthorizerError::new(e.to_string()))
    }
}
