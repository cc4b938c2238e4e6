//! Endpoint names and the identities devices present when they connect.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operation::{deserialize_base64, serialize_base64};

/// Logical name a device claims for itself during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointName(pub String);

impl EndpointName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credential descriptor established by the transport security layer.
///
/// The handshake itself has already happened by the time a device identity
/// reaches the orchestrator; this only describes *who* completed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceIdentity {
    /// Pre-shared key, identified by its key handle.
    Psk { identity: String },
    /// X.509 certificate, identified by its subject distinguished name.
    X509 { subject: String },
    /// Raw public key.
    Rpk {
        #[serde(
            serialize_with = "serialize_base64",
            deserialize_with = "deserialize_base64"
        )]
        public_key: Vec<u8>,
    },
}

impl DeviceIdentity {
    pub fn psk(identity: impl Into<String>) -> Self {
        Self::Psk {
            identity: identity.into(),
        }
    }

    pub fn x509(subject: impl Into<String>) -> Self {
        Self::X509 {
            subject: subject.into(),
        }
    }

    pub fn rpk(public_key: impl Into<Vec<u8>>) -> Self {
        Self::Rpk {
            public_key: public_key.into(),
        }
    }

    /// Short label for logs and audit messages. Never includes key material.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Psk { .. } => "psk",
            Self::X509 { .. } => "x509",
            Self::Rpk { .. } => "rpk",
        }
    }

    /// Common name of an X.509 identity's subject, if present.
    pub fn x509_common_name(&self) -> Option<&str> {
        match self {
            Self::X509 { subject } => common_name(subject),
            _ => None,
        }
    }
}

/// Extract the `CN` attribute from a distinguished name such as
/// `CN=device-1, O=Acme, C=US`.
///
/// A subject without a `CN` attribute is treated as its own common name only
/// when it contains no `=` at all (some transports hand over the bare CN).
pub fn common_name(subject: &str) -> Option<&str> {
    if !subject.contains('=') {
        let trimmed = subject.trim();
        return (!trimmed.is_empty()).then_some(trimmed);
    }

    subject.split(',').find_map(|rdn| {
        let (attr, value) = rdn.split_once('=')?;
        attr.trim()
            .eq_ignore_ascii_case("CN")
            .then(|| value.trim())
    })
}
