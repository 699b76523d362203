//! AgentClient trait for mocking
//!
//! This trait abstracts the agent client so reconcilers can be tested
//! against `MockAgentClient`. The gRPC `AgentClient` and the
//! `RetryingAgentClient` decorator implement it as well.

use crate::error::AgentError;
use crate::models::*;

/// One method per agent operation family.
///
/// Every call is safe to repeat with identical arguments: the agent treats a
/// repeated enable, or a repeated removal of an absent member, as success.
#[async_trait::async_trait]
pub trait AgentClientTrait: Send + Sync {
    // Fencing
    async fn fence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError>;
    async fn unfence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError>;

    // One-shot volume operations
    async fn reclaim_space(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError>;
    async fn rotate_key(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError>;

    // Replication
    async fn enable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError>;
    async fn disable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError>;
    async fn promote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError>;
    async fn demote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError>;
    async fn resync(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError>;

    // Volume groups
    async fn create_group(&self, request: &CreateGroupRequest) -> Result<GroupResponse, AgentError>;
    async fn add_volume_to_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError>;
    async fn remove_volume_from_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError>;
    async fn delete_group(&self, request: &DeleteGroupRequest) -> Result<(), AgentError>;
}
