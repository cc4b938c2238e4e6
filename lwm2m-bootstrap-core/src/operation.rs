//! Provisioning operations sent to a device and the outcomes reported back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// Object Paths
// ============================================================================

/// Object security (0): credentials for each server account.
pub const SECURITY_OBJECT_ID: u16 = 0;
/// Object server (1): registration parameters for each server account.
pub const SERVER_OBJECT_ID: u16 = 1;

/// Path into the device's object tree: `/`, `/obj`, `/obj/inst` or
/// `/obj/inst/res`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath {
    object: Option<u16>,
    instance: Option<u16>,
    resource: Option<u16>,
}

impl ObjectPath {
    pub const ROOT: ObjectPath = ObjectPath {
        object: None,
        instance: None,
        resource: None,
    };

    pub fn object(object: u16) -> Self {
        Self {
            object: Some(object),
            ..Self::ROOT
        }
    }

    pub fn instance(object: u16, instance: u16) -> Self {
        Self {
            object: Some(object),
            instance: Some(instance),
            resource: None,
        }
    }

    pub fn resource(object: u16, instance: u16, resource: u16) -> Self {
        Self {
            object: Some(object),
            instance: Some(instance),
            resource: Some(resource),
        }
    }

    pub fn object_id(&self) -> Option<u16> {
        self.object
    }

    pub fn instance_id(&self) -> Option<u16> {
        self.instance
    }

    pub fn resource_id(&self) -> Option<u16> {
        self.resource
    }

    pub fn is_root(&self) -> bool {
        self.object.is_none()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for id in [self.object, self.instance, self.resource].into_iter().flatten() {
            write!(f, "/{id}")?;
        }
        Ok(())
    }
}

/// Error when a string is not a valid object path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object path: {0:?}")]
pub struct InvalidObjectPath(pub String);

impl FromStr for ObjectPath {
    type Err = InvalidObjectPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidObjectPath(s.to_string());

        let rest = s.strip_prefix('/').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Ok(Self::ROOT);
        }

        let ids = rest
            .split('/')
            .map(|part| part.parse::<u16>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        match ids.as_slice() {
            [o] => Ok(Self::object(*o)),
            [o, i] => Ok(Self::instance(*o, *i)),
            [o, i, r] => Ok(Self::resource(*o, *i, *r)),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for ObjectPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Value written to a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResourceValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Opaque(
        #[serde(
            serialize_with = "serialize_base64",
            deserialize_with = "deserialize_base64"
        )]
        Vec<u8>,
    ),
}

/// One unit of work sent to the device during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningOperation {
    /// Ask the device which objects and instances it holds.
    Discover { path: ObjectPath },
    /// Read a value back from the device.
    Read { path: ObjectPath },
    /// Write an object instance (resource id -> value).
    Write {
        path: ObjectPath,
        resources: BTreeMap<u16, ResourceValue>,
    },
    /// Delete an object or instance.
    Delete { path: ObjectPath },
    /// Terminal marker: no more provisioning work.
    Finish,
}

impl ProvisioningOperation {
    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish)
    }

    /// Target path, `None` for the finish marker.
    pub fn path(&self) -> Option<&ObjectPath> {
        match self {
            Self::Discover { path }
            | Self::Read { path }
            | Self::Write { path, .. }
            | Self::Delete { path } => Some(path),
            Self::Finish => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover { .. } => "BootstrapDiscover",
            Self::Read { .. } => "BootstrapRead",
            Self::Write { .. } => "BootstrapWrite",
            Self::Delete { .. } => "BootstrapDelete",
            Self::Finish => "BootstrapFinish",
        }
    }
}

impl fmt::Display for ProvisioningOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Some(path) => write!(f, "{} {}", self.name(), path),
            None => f.write_str(self.name()),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Response code returned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Changed,
    Deleted,
    Content,
    BadRequest,
    Unauthorized,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    InternalServerError,
}

impl ResponseCode {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Changed | Self::Deleted | Self::Content)
    }

    /// CoAP dotted notation, e.g. `2.04`.
    pub fn as_coap(&self) -> &'static str {
        match self {
            Self::Changed => "2.04",
            Self::Deleted => "2.02",
            Self::Content => "2.05",
            Self::BadRequest => "4.00",
            Self::Unauthorized => "4.01",
            Self::NotFound => "4.04",
            Self::MethodNotAllowed => "4.05",
            Self::NotAcceptable => "4.06",
            Self::InternalServerError => "5.00",
        }
    }
}

/// Link advertised by a device in a discover response, e.g.
/// `</0/1>;ssid=101;uri="coaps://dm.example.com"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLink {
    pub path: ObjectPath,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ObjectLink {
    pub fn new(path: ObjectPath) -> Self {
        Self {
            path,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A decoded response from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub code: ResponseCode,
    /// Links from a discover response; empty otherwise.
    #[serde(default)]
    pub links: Vec<ObjectLink>,
    /// Diagnostic payload sent with an error response.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl DeviceResponse {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            links: Vec::new(),
            error_message: None,
        }
    }

    pub fn with_links(mut self, links: Vec<ObjectLink>) -> Self {
        self.links = links;
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl fmt::Display for DeviceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self.code, self.code.as_coap())?;
        if let Some(message) = &self.error_message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Result of sending one operation, as reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Device answered with a success code.
    Success(DeviceResponse),
    /// Device answered with an error code.
    ErrorResponse(DeviceResponse),
    /// Timeout, connection loss, malformed response.
    TransportFailure(String),
}

impl Outcome {
    /// Classify a device response by its code.
    pub fn from_response(response: DeviceResponse) -> Self {
        if response.is_success() {
            Self::Success(response)
        } else {
            Self::ErrorResponse(response)
        }
    }

    pub fn response(&self) -> Option<&DeviceResponse> {
        match self {
            Self::Success(r) | Self::ErrorResponse(r) => Some(r),
            Self::TransportFailure(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

pub(crate) fn serialize_base64<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    serializer.serialize_str(&encoded)
}

pub(crate) fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(&s)
        .map_err(serde::de::Error::custom)
}
