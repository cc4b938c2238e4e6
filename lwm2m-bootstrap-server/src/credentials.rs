//! In-memory credential store.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use lwm2m_bootstrap_auth::{CredentialStore, CredentialStoreError, SecurityInfo};
use lwm2m_bootstrap_core::EndpointName;

use crate::bootstrap_config::BootstrapConfigStore;
use crate::config::ConfigError;

#[derive(Debug, Default)]
struct Index {
    by_identity: HashMap<String, SecurityInfo>,
    by_endpoint: HashMap<EndpointName, Vec<SecurityInfo>>,
}

impl Index {
    fn build(records: impl IntoIterator<Item = SecurityInfo>) -> Result<Self, ConfigError> {
        let mut index = Self::default();
        for info in records {
            if let Some(identity) = info.credential.psk_identity() {
                if index
                    .by_identity
                    .insert(identity.to_string(), info.clone())
                    .is_some()
                {
                    return Err(ConfigError::DuplicatePskIdentity(identity.to_string()));
                }
            }
            index
                .by_endpoint
                .entry(info.endpoint.clone())
                .or_default()
                .push(info);
        }
        Ok(index)
    }
}

/// Credential records indexed by PSK identity and by endpoint.
///
/// `has_bootstrap_config` is answered by the shared template store, so both
/// stay consistent across reloads.
#[derive(Debug)]
pub struct InMemorySecurityStore {
    index: ArcSwap<Index>,
    configs: Arc<BootstrapConfigStore>,
}

impl InMemorySecurityStore {
    pub fn new(
        records: impl IntoIterator<Item = SecurityInfo>,
        configs: Arc<BootstrapConfigStore>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            index: ArcSwap::from_pointee(Index::build(records)?),
            configs,
        })
    }

    /// Swap in a new record set. On error the previous records stay active.
    pub fn replace_all(
        &self,
        records: impl IntoIterator<Item = SecurityInfo>,
    ) -> Result<(), ConfigError> {
        let index = Index::build(records)?;
        self.index.store(Arc::new(index));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.load().by_endpoint.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for InMemorySecurityStore {
    fn get_by_identity(
        &self,
        psk_identity: &str,
    ) -> Result<Option<SecurityInfo>, CredentialStoreError> {
        Ok(self.index.load().by_identity.get(psk_identity).cloned())
    }

    fn get_all_by_endpoint(
        &self,
        endpoint: &EndpointName,
    ) -> Result<Vec<SecurityInfo>, CredentialStoreError> {
        Ok(self
            .index
            .load()
            .by_endpoint
            .get(endpoint)
            .cloned()
            .unwrap_or_default())
    }

    fn has_bootstrap_config(&self, endpoint: &EndpointName) -> Result<bool, CredentialStoreError> {
        Ok(self.configs.contains(endpoint))
    }
}
