//! Per-endpoint provisioning templates.
//!
//! A [`BootstrapConfig`] describes what a device should look like after
//! bootstrap: which paths to wipe, and which security and server accounts to
//! write. Templates are held in a [`BootstrapConfigStore`] snapshot that can be
//! swapped at runtime without blocking readers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine;
use lwm2m_bootstrap_core::{EndpointName, ObjectModel, ObjectPath, ResourceValue};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ConfigError;

// ============================================================================
// Resource ids
// ============================================================================

mod security_res {
    pub const SERVER_URI: u16 = 0;
    pub const BOOTSTRAP_SERVER: u16 = 1;
    pub const SECURITY_MODE: u16 = 2;
    pub const PUBLIC_KEY_OR_IDENTITY: u16 = 3;
    pub const SERVER_PUBLIC_KEY: u16 = 4;
    pub const SECRET_KEY: u16 = 5;
    pub const SHORT_SERVER_ID: u16 = 10;
    pub const CLIENT_HOLD_OFF_TIME: u16 = 11;
    pub const BOOTSTRAP_ACCOUNT_TIMEOUT: u16 = 12;
}

mod server_res {
    pub const SHORT_SERVER_ID: u16 = 0;
    pub const LIFETIME: u16 = 1;
    pub const DEFAULT_MIN_PERIOD: u16 = 2;
    pub const DEFAULT_MAX_PERIOD: u16 = 3;
    pub const NOTIFICATION_STORING: u16 = 6;
    pub const BINDING: u16 = 7;
}

// ============================================================================
// Template types
// ============================================================================

/// LwM2M security mode (resource `/0/x/2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    Psk,
    Rpk,
    X509,
    NoSec,
}

impl SecurityMode {
    pub fn code(&self) -> i64 {
        match self {
            Self::Psk => 0,
            Self::Rpk => 1,
            Self::X509 => 2,
            Self::NoSec => 3,
        }
    }
}

/// One instance of the security object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInstance {
    pub instance_id: u16,
    pub uri: String,
    /// This account points at a bootstrap server.
    #[serde(default)]
    pub bootstrap_server: bool,
    pub security_mode: SecurityMode,
    #[serde(default, with = "base64_bytes")]
    pub public_key_or_identity: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub server_public_key: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub secret_key: Vec<u8>,
    #[serde(default)]
    pub short_server_id: Option<u16>,
    #[serde(default)]
    pub client_hold_off_time: Option<i64>,
    #[serde(default)]
    pub bootstrap_account_timeout: Option<i64>,
}

impl SecurityInstance {
    pub fn resources(&self) -> BTreeMap<u16, ResourceValue> {
        use security_res::*;

        let mut res = BTreeMap::new();
        res.insert(SERVER_URI, ResourceValue::String(self.uri.clone()));
        res.insert(BOOTSTRAP_SERVER, ResourceValue::Boolean(self.bootstrap_server));
        res.insert(SECURITY_MODE, ResourceValue::Integer(self.security_mode.code()));
        res.insert(
            PUBLIC_KEY_OR_IDENTITY,
            ResourceValue::Opaque(self.public_key_or_identity.clone()),
        );
        res.insert(
            SERVER_PUBLIC_KEY,
            ResourceValue::Opaque(self.server_public_key.clone()),
        );
        res.insert(SECRET_KEY, ResourceValue::Opaque(self.secret_key.clone()));
        if let Some(ssid) = self.short_server_id {
            res.insert(SHORT_SERVER_ID, ResourceValue::Integer(i64::from(ssid)));
        }
        if let Some(t) = self.client_hold_off_time {
            res.insert(CLIENT_HOLD_OFF_TIME, ResourceValue::Integer(t));
        }
        if let Some(t) = self.bootstrap_account_timeout {
            res.insert(BOOTSTRAP_ACCOUNT_TIMEOUT, ResourceValue::Integer(t));
        }
        res
    }
}

/// One instance of the server object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    pub instance_id: u16,
    pub short_server_id: u16,
    /// Registration lifetime in seconds.
    pub lifetime: i64,
    #[serde(default)]
    pub default_min_period: Option<i64>,
    #[serde(default)]
    pub default_max_period: Option<i64>,
    #[serde(default)]
    pub notification_storing: bool,
    #[serde(default = "default_binding")]
    pub binding: String,
}

fn default_binding() -> String {
    "U".to_string()
}

impl ServerInstance {
    pub fn resources(&self) -> BTreeMap<u16, ResourceValue> {
        use server_res::*;

        let mut res = BTreeMap::new();
        res.insert(
            SHORT_SERVER_ID,
            ResourceValue::Integer(i64::from(self.short_server_id)),
        );
        res.insert(LIFETIME, ResourceValue::Integer(self.lifetime));
        if let Some(p) = self.default_min_period {
            res.insert(DEFAULT_MIN_PERIOD, ResourceValue::Integer(p));
        }
        if let Some(p) = self.default_max_period {
            res.insert(DEFAULT_MAX_PERIOD, ResourceValue::Integer(p));
        }
        res.insert(
            NOTIFICATION_STORING,
            ResourceValue::Boolean(self.notification_storing),
        );
        res.insert(BINDING, ResourceValue::String(self.binding.clone()));
        res
    }
}

/// An object the device is expected to support, with its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedObject {
    pub object_id: u16,
    pub version: String,
}

/// Provisioning template for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub endpoint: EndpointName,
    /// Paths deleted before any write, in order.
    #[serde(default)]
    pub to_delete: Vec<ObjectPath>,
    #[serde(default)]
    pub security: Vec<SecurityInstance>,
    #[serde(default)]
    pub servers: Vec<ServerInstance>,
    /// Discover the device's security instances first and renumber the
    /// configured ones around its bootstrap-server account.
    #[serde(default)]
    pub auto_id_for_security_object: bool,
    /// Empty means security and server objects at version 1.1.
    #[serde(default)]
    pub supported_objects: Vec<SupportedObject>,
}

impl BootstrapConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointName::new(endpoint),
            to_delete: Vec::new(),
            security: Vec::new(),
            servers: Vec::new(),
            auto_id_for_security_object: false,
            supported_objects: Vec::new(),
        }
    }

    pub fn object_model(&self) -> ObjectModel {
        if self.supported_objects.is_empty() {
            return ObjectModel::default()
                .with_object(lwm2m_bootstrap_core::SECURITY_OBJECT_ID, "1.1")
                .with_object(lwm2m_bootstrap_core::SERVER_OBJECT_ID, "1.1");
        }
        self.supported_objects
            .iter()
            .fold(ObjectModel::default(), |model, obj| {
                model.with_object(obj.object_id, obj.version.clone())
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            endpoint: self.endpoint.to_string(),
            reason,
        };

        if self.endpoint.as_str().is_empty() {
            return Err(invalid("endpoint name is empty".into()));
        }

        let mut ids = BTreeSet::new();
        for s in &self.security {
            if !ids.insert(s.instance_id) {
                return Err(invalid(format!(
                    "duplicate security instance {}",
                    s.instance_id
                )));
            }
            if !s.bootstrap_server && s.short_server_id.is_none() {
                return Err(invalid(format!(
                    "security instance {} needs a short_server_id",
                    s.instance_id
                )));
            }
        }
        if self.security.iter().filter(|s| s.bootstrap_server).count() > 1 {
            return Err(invalid("more than one bootstrap-server account".into()));
        }

        let mut ids = BTreeSet::new();
        for s in &self.servers {
            if !ids.insert(s.instance_id) {
                return Err(invalid(format!(
                    "duplicate server instance {}",
                    s.instance_id
                )));
            }
            if s.lifetime <= 0 {
                return Err(invalid(format!(
                    "server instance {} has non-positive lifetime",
                    s.instance_id
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

type ConfigMap = HashMap<EndpointName, Arc<BootstrapConfig>>;

/// Lock-free snapshot of all provisioning templates.
#[derive(Debug)]
pub struct BootstrapConfigStore {
    configs: ArcSwap<ConfigMap>,
}

impl Default for BootstrapConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapConfigStore {
    pub fn new() -> Self {
        Self {
            configs: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn from_configs(
        configs: impl IntoIterator<Item = BootstrapConfig>,
    ) -> Result<Self, ConfigError> {
        let store = Self::new();
        store.replace_all(configs)?;
        Ok(store)
    }

    pub fn get(&self, endpoint: &EndpointName) -> Option<Arc<BootstrapConfig>> {
        self.configs.load().get(endpoint).cloned()
    }

    pub fn contains(&self, endpoint: &EndpointName) -> bool {
        self.configs.load().contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.configs.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.load().is_empty()
    }

    /// Validate every template, then swap in the new set atomically.
    ///
    /// On error the previous snapshot stays in place.
    pub fn replace_all(
        &self,
        configs: impl IntoIterator<Item = BootstrapConfig>,
    ) -> Result<(), ConfigError> {
        let mut map = ConfigMap::new();
        for config in configs {
            config.validate()?;
            let endpoint = config.endpoint.clone();
            if map.insert(endpoint.clone(), Arc::new(config)).is_some() {
                return Err(ConfigError::DuplicateEndpoint(endpoint.to_string()));
            }
        }
        self.configs.store(Arc::new(map));
        Ok(())
    }

    /// Add or replace a single template.
    pub fn upsert(&self, config: BootstrapConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        self.configs.rcu(|current| {
            let mut next = ConfigMap::clone(current);
            next.insert(config.endpoint.clone(), config.clone());
            next
        });
        Ok(())
    }

    pub fn remove(&self, endpoint: &EndpointName) -> bool {
        let mut removed = false;
        self.configs.rcu(|current| {
            let mut next = ConfigMap::clone(current);
            removed = next.remove(endpoint).is_some();
            next
        });
        removed
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(serde::de::Error::custom)
    }
}
