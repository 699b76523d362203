//! Agent client errors

use std::time::Duration;

use thiserror::Error;
use tonic::Code;

/// How the caller should treat a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Repeating the same call may succeed
    Retryable,
    /// Repeating the same call will fail the same way
    Terminal,
}

/// Errors that can occur when calling the agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent answered with a gRPC status
    #[error("agent returned {code:?}: {message}")]
    Status {
        /// gRPC status code
        code: Code,
        /// Message from the agent
        message: String,
    },

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A single attempt exceeded its timeout
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation name
        operation: String,
        /// Per-attempt timeout
        timeout: Duration,
    },

    /// The retry deadline elapsed before the call succeeded
    #[error("{operation} abandoned after {deadline:?}: {last}")]
    DeadlineExceeded {
        /// Operation name
        operation: String,
        /// Deadline over all attempts
        deadline: Duration,
        /// Error of the last attempt
        last: Box<AgentError>,
    },

    /// An endpoint URI could not be parsed
    #[error("invalid agent endpoint {0}")]
    InvalidEndpoint(String),

    /// No endpoint is configured for the driver
    #[error("no agent endpoint configured for driver {0}")]
    NoEndpoint(String),

    /// Request rejected before it was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<tonic::Status> for AgentError {
    fn from(status: tonic::Status) -> Self {
        AgentError::Status {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl AgentError {
    /// Builds a status error
    pub fn status(code: Code, message: impl Into<String>) -> Self {
        AgentError::Status {
            code,
            message: message.into(),
        }
    }

    /// Classifies the error.
    ///
    /// Status codes the agent uses for bad input or missing targets are
    /// terminal; everything else, including transport failures and codes
    /// this client does not know, is retryable.
    pub fn class(&self) -> ErrorClass {
        match self {
            AgentError::Status { code, .. } => match code {
                Code::InvalidArgument
                | Code::NotFound
                | Code::AlreadyExists
                | Code::FailedPrecondition
                | Code::PermissionDenied
                | Code::Unauthenticated
                | Code::Unimplemented
                | Code::OutOfRange => ErrorClass::Terminal,
                _ => ErrorClass::Retryable,
            },
            AgentError::InvalidEndpoint(_)
            | AgentError::NoEndpoint(_)
            | AgentError::InvalidRequest(_) => ErrorClass::Terminal,
            AgentError::Transport(_)
            | AgentError::Timeout { .. }
            | AgentError::DeadlineExceeded { .. } => ErrorClass::Retryable,
        }
    }

    /// True when the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// gRPC code of the underlying status, looking through deadline wrappers
    pub fn code(&self) -> Option<Code> {
        match self {
            AgentError::Status { code, .. } => Some(*code),
            AgentError::DeadlineExceeded { last, .. } => last.code(),
            _ => None,
        }
    }

    /// The agent reported the target as absent
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(Code::NotFound)
    }

    /// The agent reported the target as already present
    pub fn is_already_exists(&self) -> bool {
        self.code() == Some(Code::AlreadyExists)
    }
}
