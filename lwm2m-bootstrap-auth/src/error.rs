//! Credential store error types.

/// Errors a [`CredentialStore`](crate::CredentialStore) may report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CredentialStoreError {
    /// The backing store could not be reached.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("corrupt credential record for endpoint {endpoint}: {reason}")]
    Corrupt { endpoint: String, reason: String },
}
