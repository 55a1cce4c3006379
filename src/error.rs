//! Error types for the Vultr infrastructure provider

use thiserror::Error;

use crate::vultr::VultrError;

/// Main error type for provider operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Vultr API error
    #[error("vultr error: {0}")]
    Vultr(#[from] VultrError),

    /// Resource configuration that will not fix itself (missing SSH key,
    /// malformed bootstrap data, unparseable provider id)
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Scope construction or persistence error
    #[error("scope error: {0}")]
    Scope(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a scope error with the given message
    pub fn scope(msg: impl Into<String>) -> Self {
        Self::Scope(msg.into())
    }

    /// Check if retrying the same pass can succeed without a resource change
    ///
    /// Validation errors need an operator to fix the resource; everything
    /// else may be transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(_) => true,
            Error::Vultr(e) => !matches!(e, VultrError::InvalidResponse(_)),
            Error::Validation(_) => false,
            Error::Serialization(_) => false,
            Error::Scope(_) => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
