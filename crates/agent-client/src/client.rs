//! gRPC agent client
//!
//! Each driver maps to one agent endpoint. Channels are created lazily on
//! first use and shared by every call for that driver afterwards.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::DateTime;
use tokio::sync::Mutex;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::agent_trait::AgentClientTrait;
use crate::error::AgentError;
use crate::models::*;
use crate::proto::{self, paths};

/// Agent client configuration
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// Endpoint used when a driver has no entry in `endpoints`
    pub default_endpoint: Option<String>,
    /// Driver name to endpoint URI
    pub endpoints: BTreeMap<String, String>,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Timeout sent with every request
    pub call_timeout: Duration,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            default_endpoint: None,
            endpoints: BTreeMap::new(),
            connect_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// gRPC client for the CSI-Addons agent
#[derive(Debug)]
pub struct AgentClient {
    config: AgentClientConfig,
    channels: Mutex<HashMap<String, Channel>>,
}

impl AgentClient {
    /// Creates a client, validating every configured endpoint up front
    pub fn new(config: AgentClientConfig) -> Result<Self, AgentError> {
        for uri in config.endpoints.values().chain(config.default_endpoint.iter()) {
            Endpoint::from_shared(uri.clone())
                .map_err(|e| AgentError::InvalidEndpoint(format!("{uri}: {e}")))?;
        }
        Ok(Self {
            config,
            channels: Mutex::new(HashMap::new()),
        })
    }

    fn endpoint_for(&self, driver: &str) -> Result<&str, AgentError> {
        self.config
            .endpoints
            .get(driver)
            .or(self.config.default_endpoint.as_ref())
            .map(String::as_str)
            .ok_or_else(|| AgentError::NoEndpoint(driver.to_string()))
    }

    async fn channel(&self, driver: &str) -> Result<Channel, AgentError> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(driver) {
            return Ok(channel.clone());
        }

        let uri = self.endpoint_for(driver)?;
        let channel = Endpoint::from_shared(uri.to_string())
            .map_err(|e| AgentError::InvalidEndpoint(format!("{uri}: {e}")))?
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.call_timeout)
            .connect_lazy();
        debug!("Created agent channel for driver {} at {}", driver, uri);
        channels.insert(driver.to_string(), channel.clone());
        Ok(channel)
    }

    async fn unary<Req, Resp>(
        &self,
        driver: &str,
        path: &'static str,
        request: Req,
    ) -> Result<Resp, AgentError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let channel = self.channel(driver).await?;
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await?;

        let mut request = tonic::Request::new(request);
        request.set_timeout(self.config.call_timeout);
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }
}

fn secret_fields(secret: Option<&SecretRef>) -> (String, String) {
    secret
        .map(|s| (s.name.clone(), s.namespace.clone()))
        .unwrap_or_default()
}

fn to_wire_parameters(parameters: &BTreeMap<String, String>) -> HashMap<String, String> {
    parameters.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn non_empty(message: String) -> Option<String> {
    if message.is_empty() { None } else { Some(message) }
}

fn fence_request(request: &FenceRequest) -> proto::FenceClusterNetworkRequest {
    let (secret_name, secret_namespace) = secret_fields(request.secret.as_ref());
    proto::FenceClusterNetworkRequest {
        parameters: to_wire_parameters(&request.parameters),
        secret_name,
        secret_namespace,
        cidrs: request
            .cidrs
            .iter()
            .map(|cidr| proto::Cidr { cidr: cidr.clone() })
            .collect(),
        driver: request.driver.clone(),
    }
}

fn volume_request(request: &VolumeRequest) -> proto::VolumeOperationRequest {
    let (secret_name, secret_namespace) = secret_fields(request.secret.as_ref());
    proto::VolumeOperationRequest {
        volume_id: request.volume_handle.clone(),
        secret_name,
        secret_namespace,
        parameters: to_wire_parameters(&request.parameters),
    }
}

fn replication_request(request: &ReplicationRequest) -> proto::ReplicationRequest {
    let (secret_name, secret_namespace) = secret_fields(request.secret.as_ref());
    let source = match &request.source {
        ReplicationSource::Volume(handle) => {
            proto::replication_source::Type::Volume(proto::VolumeSource {
                volume_id: handle.clone(),
            })
        }
        ReplicationSource::Group(handle) => {
            proto::replication_source::Type::VolumeGroup(proto::VolumeGroupSource {
                volume_group_id: handle.clone(),
            })
        }
    };
    proto::ReplicationRequest {
        replication_source: Some(proto::ReplicationSource {
            r#type: Some(source),
        }),
        replication_id: request.replication_id.clone(),
        parameters: to_wire_parameters(&request.parameters),
        secret_name,
        secret_namespace,
        force: request.force,
    }
}

fn replication_response(response: proto::ReplicationResponse) -> ReplicationResponse {
    let sync_state = match proto::SyncState::try_from(response.sync_state) {
        Ok(proto::SyncState::Syncing) => SyncState::Syncing,
        Ok(proto::SyncState::Synced) => SyncState::Synced,
        Ok(proto::SyncState::Degraded) => SyncState::Degraded,
        Ok(proto::SyncState::Resyncing) => SyncState::Resyncing,
        Ok(proto::SyncState::Unknown) | Err(_) => SyncState::Unknown,
    };
    ReplicationResponse {
        sync_state,
        message: non_empty(response.message),
        last_sync_time: response
            .last_sync_time_unix
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
}

fn operation_response(message: String, pre: Option<i64>, post: Option<i64>) -> OperationResponse {
    OperationResponse {
        message: non_empty(message),
        pre_usage_bytes: pre,
        post_usage_bytes: post,
    }
}

fn group_response(response: proto::VolumeGroupResponse) -> GroupResponse {
    GroupResponse {
        group_handle: response.volume_group_id,
        volume_handles: response.volume_ids,
    }
}

fn member_request(request: &GroupMemberRequest) -> proto::VolumeGroupMemberRequest {
    let (secret_name, secret_namespace) = secret_fields(request.secret.as_ref());
    proto::VolumeGroupMemberRequest {
        volume_group_id: request.group_handle.clone(),
        volume_id: request.volume_handle.clone(),
        parameters: to_wire_parameters(&request.parameters),
        secret_name,
        secret_namespace,
    }
}

#[async_trait::async_trait]
impl AgentClientTrait for AgentClient {
    async fn fence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError> {
        let response: proto::FenceClusterNetworkResponse = self
            .unary(&request.driver, paths::FENCE_CLUSTER_NETWORK, fence_request(request))
            .await?;
        Ok(operation_response(response.message, None, None))
    }

    async fn unfence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError> {
        let response: proto::FenceClusterNetworkResponse = self
            .unary(&request.driver, paths::UNFENCE_CLUSTER_NETWORK, fence_request(request))
            .await?;
        Ok(operation_response(response.message, None, None))
    }

    async fn reclaim_space(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError> {
        let response: proto::VolumeOperationResponse = self
            .unary(&request.driver, paths::RECLAIM_SPACE, volume_request(request))
            .await?;
        Ok(operation_response(
            response.message,
            response.pre_usage_bytes,
            response.post_usage_bytes,
        ))
    }

    async fn rotate_key(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError> {
        let response: proto::VolumeOperationResponse = self
            .unary(&request.driver, paths::ENCRYPTION_KEY_ROTATE, volume_request(request))
            .await?;
        Ok(operation_response(response.message, None, None))
    }

    async fn enable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        let response = self
            .unary(&request.driver, paths::ENABLE_VOLUME_REPLICATION, replication_request(request))
            .await?;
        Ok(replication_response(response))
    }

    async fn disable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        let response = self
            .unary(&request.driver, paths::DISABLE_VOLUME_REPLICATION, replication_request(request))
            .await?;
        Ok(replication_response(response))
    }

    async fn promote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        let response = self
            .unary(&request.driver, paths::PROMOTE_VOLUME, replication_request(request))
            .await?;
        Ok(replication_response(response))
    }

    async fn demote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        let response = self
            .unary(&request.driver, paths::DEMOTE_VOLUME, replication_request(request))
            .await?;
        Ok(replication_response(response))
    }

    async fn resync(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        let response = self
            .unary(&request.driver, paths::RESYNC_VOLUME, replication_request(request))
            .await?;
        Ok(replication_response(response))
    }

    async fn create_group(&self, request: &CreateGroupRequest) -> Result<GroupResponse, AgentError> {
        let (secret_name, secret_namespace) = secret_fields(request.secret.as_ref());
        let wire = proto::CreateVolumeGroupRequest {
            name: request.name.clone(),
            volume_ids: request.volume_handles.clone(),
            parameters: to_wire_parameters(&request.parameters),
            secret_name,
            secret_namespace,
        };
        let response = self
            .unary(&request.driver, paths::CREATE_VOLUME_GROUP, wire)
            .await?;
        Ok(group_response(response))
    }

    async fn add_volume_to_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError> {
        let response = self
            .unary(&request.driver, paths::ADD_VOLUME_TO_GROUP, member_request(request))
            .await?;
        Ok(group_response(response))
    }

    async fn remove_volume_from_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError> {
        let response = self
            .unary(&request.driver, paths::REMOVE_VOLUME_FROM_GROUP, member_request(request))
            .await?;
        Ok(group_response(response))
    }

    async fn delete_group(&self, request: &DeleteGroupRequest) -> Result<(), AgentError> {
        let (secret_name, secret_namespace) = secret_fields(request.secret.as_ref());
        let wire = proto::DeleteVolumeGroupRequest {
            volume_group_id: request.group_handle.clone(),
            secret_name,
            secret_namespace,
        };
        let _: proto::DeleteVolumeGroupResponse = self
            .unary(&request.driver, paths::DELETE_VOLUME_GROUP, wire)
            .await?;
        Ok(())
    }
}
