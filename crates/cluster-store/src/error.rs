//! Cluster store errors

use thiserror::Error;

/// Errors returned by a [`crate::ResourceStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An object with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The object is missing a required field (name, resource version)
    #[error("Invalid object: {0}")]
    Invalid(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other API server error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) if response.code == 404 => {
                StoreError::NotFound(response.message.clone())
            }
            kube::Error::Api(response) if response.code == 409 => {
                StoreError::Conflict(response.message.clone())
            }
            _ => StoreError::Kube(err),
        }
    }
}

impl StoreError {
    /// True for optimistic-concurrency conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// True when the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
