//! Error types for credential operations

/// Errors from credential acquisition, refresh, and storage.
///
/// `Provider` is a structured rejection from the identity provider (e.g.
/// `invalid_grant`) — an expected outcome, surfaced to the caller verbatim.
/// `Transport` is a network or timeout failure; the caller decides whether
/// to retry, this crate never does. `Storage` is a persistence failure;
/// reads degrade to "no credential" before ever producing this, so it only
/// appears on writes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("provider rejected the request: {error}")]
    Provider {
        error: String,
        description: Option<String>,
    },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("credential storage failure: {0}")]
    Storage(String),
}

impl Error {
    /// Whether this is a provider-side rejection (as opposed to a failure
    /// reaching the provider at all).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Provider { .. })
    }
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
