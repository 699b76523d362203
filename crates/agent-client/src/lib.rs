//! CSI-Addons Agent Client
//!
//! Typed client for the per-node CSI-Addons agent. Each storage operation the
//! controllers need (fencing, space reclamation, key rotation, replication
//! and volume groups) is one unary gRPC call on the `csiaddons.agent.v1.Agent`
//! service.
//!
//! # Example
//!
//! ```no_run
//! use agent_client::{AgentClient, AgentClientConfig, AgentClientTrait, FenceRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AgentClient::new(AgentClientConfig {
//!     default_endpoint: Some("http://csi-addons-agent:9070".to_string()),
//!     ..Default::default()
//! })?;
//!
//! let request = FenceRequest {
//!     driver: "rbd.csi.ceph.com".to_string(),
//!     cidrs: vec!["10.90.89.66/32".to_string()],
//!     ..Default::default()
//! };
//! client.fence(&request).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Per-driver endpoints**: channels are connected lazily and cached per driver
//! - **Error classification**: agent status codes map to retryable or terminal errors
//! - **Retry policy**: bounded attempts, exponential backoff with jitter, call deadline
//! - **Mocking**: `MockAgentClient` behind the `test-util` feature

pub mod client;
pub mod error;
pub mod models;
pub mod proto;
pub mod retry;
#[path = "trait.rs"]
pub mod agent_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use agent_trait::AgentClientTrait;
pub use client::{AgentClient, AgentClientConfig};
pub use error::{AgentError, ErrorClass};
pub use models::*;
pub use retry::{RetryPolicy, RetryingAgentClient};
pub use tonic::Code;
#[cfg(feature = "test-util")]
pub use mock::{MockAgentClient, MockRole, RecordedCall};
