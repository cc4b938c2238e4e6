//! Credential records a device may bootstrap with.

use base64::Engine;
use lwm2m_bootstrap_core::EndpointName;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How a device is expected to authenticate, with the material to check it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Credential {
    Psk {
        identity: String,
        #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
        key: Vec<u8>,
    },
    Rpk {
        #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
        public_key: Vec<u8>,
    },
    /// Certificate-based; the common name must match the endpoint.
    X509,
}

impl Credential {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Psk { .. } => "psk",
            Self::Rpk { .. } => "rpk",
            Self::X509 => "x509",
        }
    }

    pub fn psk_identity(&self) -> Option<&str> {
        match self {
            Self::Psk { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

// Key material stays out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Psk { identity, .. } => f
                .debug_struct("Psk")
                .field("identity", identity)
                .field("key", &"<redacted>")
                .finish(),
            Self::Rpk { public_key } => f
                .debug_struct("Rpk")
                .field("public_key_len", &public_key.len())
                .finish(),
            Self::X509 => f.write_str("X509"),
        }
    }
}

/// A credential bound to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    pub endpoint: EndpointName,
    #[serde(flatten)]
    pub credential: Credential,
}

impl SecurityInfo {
    pub fn psk(
        endpoint: impl Into<String>,
        identity: impl Into<String>,
        key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            endpoint: EndpointName::new(endpoint),
            credential: Credential::Psk {
                identity: identity.into(),
                key: key.into(),
            },
        }
    }

    pub fn rpk(endpoint: impl Into<String>, public_key: impl Into<Vec<u8>>) -> Self {
        Self {
            endpoint: EndpointName::new(endpoint),
            credential: Credential::Rpk {
                public_key: public_key.into(),
            },
        }
    }

    pub fn x509(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointName::new(endpoint),
            credential: Credential::X509,
        }
    }
}

fn to_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(serde::de::Error::custom)
}
