//! Server configuration file.
//!
//! ```toml
//! [orchestrator]
//! enforce_authorization = true
//!
//! [[security]]
//! endpoint = "sensor-1"
//! mode = "psk"
//! identity = "sensor-1-key"
//! key = "AAECAw=="
//!
//! [[bootstrap]]
//! endpoint = "sensor-1"
//! to_delete = ["/0", "/1"]
//! # ...security / servers tables, see `BootstrapConfig`
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use lwm2m_bootstrap_auth::SecurityInfo;
use lwm2m_bootstrap_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};

use crate::bootstrap_config::BootstrapConfig;

/// Environment variable consulted when no `--config` is given.
pub const CONFIG_ENV: &str = "LWM2M_BOOTSTRAP_CONFIG";

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("endpoint {0} is configured more than once")]
    DuplicateEndpoint(String),

    #[error("PSK identity {0} is bound to more than one endpoint")]
    DuplicatePskIdentity(String),

    #[error("invalid configuration for endpoint {endpoint}: {reason}")]
    Invalid { endpoint: String, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub orchestrator: OrchestratorConfig,
    /// Credential records devices may bootstrap with.
    pub security: Vec<SecurityInfo>,
    /// Provisioning templates, one per endpoint.
    pub bootstrap: Vec<BootstrapConfig>,
}

impl ServerConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        tracing::debug!(
            path = %path.display(),
            credentials = config.security.len(),
            templates = config.bootstrap.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Cross-record checks; each template is also validated on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut endpoints = HashSet::new();
        for template in &self.bootstrap {
            template.validate()?;
            if !endpoints.insert(&template.endpoint) {
                return Err(ConfigError::DuplicateEndpoint(template.endpoint.to_string()));
            }
        }

        let mut identities = HashSet::new();
        for info in &self.security {
            if let Some(identity) = info.credential.psk_identity() {
                if !identities.insert(identity) {
                    return Err(ConfigError::DuplicatePskIdentity(identity.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use lwm2m_bootstrap_auth::Credential;

    use super::*;

    const SAMPLE: &str = r#"
        [orchestrator]
        enforce_authorization = false

        [[security]]
        endpoint = "sensor-1"
        mode = "psk"
        identity = "sensor-1-key"
        key = "AAECAw=="

        [[security]]
        endpoint = "cam-2"
        mode = "x509"

        [[bootstrap]]
        endpoint = "sensor-1"
        to_delete = ["/0", "/1"]

        [[bootstrap.security]]
        instance_id = 0
        uri = "coaps://bs.example.com:5684"
        bootstrap_server = true
        security_mode = "psk"

        [[bootstrap.servers]]
        instance_id = 0
        short_server_id = 123
        lifetime = 300
    "#;

    #[test]
    fn parses_sample() {
        let config: ServerConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert!(!config.orchestrator.enforce_authorization);
        assert_eq!(config.security.len(), 2);
        assert_eq!(
            config.security[0].credential,
            Credential::Psk {
                identity: "sensor-1-key".into(),
                key: vec![0, 1, 2, 3],
            }
        );
        assert_eq!(config.security[1].credential, Credential::X509);
        assert_eq!(config.bootstrap[0].servers[0].short_server_id, 123);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert!(config.orchestrator.enforce_authorization);
        assert!(config.security.is_empty());
        assert!(config.bootstrap.is_empty());
    }

    #[test]
    fn duplicate_psk_identity_rejected() {
        let config = ServerConfig {
            security: vec![
                SecurityInfo::psk("a", "shared", b"k".to_vec()),
                SecurityInfo::psk("b", "shared", b"k".to_vec()),
            ],
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePskIdentity(ref id)) if id == "shared"
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.bootstrap.len(), 1);
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[security]]\nendpoint = 5\n").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
