//! Controller-specific error types.
//!
//! Agent failures during a transition are written into resource status by
//! the reconcilers; what reaches the driver as an error is classified here
//! to pick the requeue.

use agent_client::AgentError;
use cluster_store::StoreError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the CSI-Addons Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Resource store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Agent RPC error
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource spec cannot be acted on until it changes
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe server failed
    #[error("Probe server failed: {0}")]
    Server(#[from] std::io::Error),
}

impl ControllerError {
    /// A write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Store(e) if e.is_conflict())
    }

    /// Retrying the pass shortly may succeed without any spec change
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Kube(_) | ControllerError::Watch(_) | ControllerError::Server(_) => true,
            ControllerError::Store(e) => !matches!(e, StoreError::Invalid(_) | StoreError::Serialization(_)),
            ControllerError::Agent(e) => e.is_retryable(),
            ControllerError::InvalidConfig(_) | ControllerError::InvalidResource(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_client::Code;

    #[test]
    fn test_conflict_is_transient() {
        let err = ControllerError::from(StoreError::Conflict("vr-1".to_string()));
        assert!(err.is_conflict());
        assert!(err.is_transient());
    }

    #[test]
    fn test_terminal_agent_error_is_not_transient() {
        let err = ControllerError::from(AgentError::status(Code::InvalidArgument, "bad cidr"));
        assert!(!err.is_conflict());
        assert!(!err.is_transient());

        let err = ControllerError::from(AgentError::status(Code::Unavailable, "agent restarting"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_resource_is_terminal() {
        let err = ControllerError::InvalidResource("selector matches no claims".to_string());
        assert!(!err.is_transient());
    }
}
