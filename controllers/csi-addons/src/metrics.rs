//! Prometheus metrics
//!
//! Counters for reconcile passes (by kind and outcome) and agent calls (by
//! operation and outcome). Agent calls are counted by wrapping the agent
//! client, so reconcilers never touch metrics directly for RPCs.

use std::sync::Arc;

use agent_client::{
    AgentClientTrait, AgentError, CreateGroupRequest, DeleteGroupRequest, FenceRequest, GroupMemberRequest,
    GroupResponse, OperationResponse, ReplicationRequest, ReplicationResponse, VolumeRequest,
};
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};

/// Shared metrics for the controller
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    agent_calls: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered counters
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new("csi_addons_reconciles_total", "Reconcile passes by kind and outcome"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;

        let agent_calls = IntCounterVec::new(
            Opts::new("csi_addons_agent_calls_total", "Agent calls by operation and outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(agent_calls.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            agent_calls,
        })
    }

    /// Count one reconcile pass
    pub fn record_reconcile(&self, kind: &str, outcome: &str) {
        self.reconciles.with_label_values(&[kind, outcome]).inc();
    }

    /// Count one agent call (after retries)
    pub fn record_agent_call(&self, operation: &str, outcome: &str) {
        self.agent_calls.with_label_values(&[operation, outcome]).inc();
    }

    /// Current value of the reconcile counter
    pub fn reconcile_count(&self, kind: &str, outcome: &str) -> u64 {
        self.reconciles.with_label_values(&[kind, outcome]).get()
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        match TextEncoder::new().encode_to_string(&self.registry.gather()) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode metrics: {}", e);
                "# Error encoding metrics".to_string()
            }
        }
    }
}

/// Agent client that counts every call it forwards
#[derive(Clone)]
pub struct MeteredAgentClient {
    inner: Arc<dyn AgentClientTrait>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for MeteredAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredAgentClient").finish_non_exhaustive()
    }
}

impl MeteredAgentClient {
    /// Wraps `inner`
    pub fn new(inner: Arc<dyn AgentClientTrait>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }

    fn observe<T>(&self, operation: &str, result: Result<T, AgentError>) -> Result<T, AgentError> {
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) if e.is_retryable() => "retryable_error",
            Err(_) => "terminal_error",
        };
        self.metrics.record_agent_call(operation, outcome);
        result
    }
}

#[async_trait::async_trait]
impl AgentClientTrait for MeteredAgentClient {
    async fn fence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError> {
        self.observe("fence", self.inner.fence(request).await)
    }

    async fn unfence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError> {
        self.observe("unfence", self.inner.unfence(request).await)
    }

    async fn reclaim_space(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError> {
        self.observe("reclaim_space", self.inner.reclaim_space(request).await)
    }

    async fn rotate_key(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError> {
        self.observe("rotate_key", self.inner.rotate_key(request).await)
    }

    async fn enable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.observe("enable_replication", self.inner.enable_replication(request).await)
    }

    async fn disable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.observe("disable_replication", self.inner.disable_replication(request).await)
    }

    async fn promote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.observe("promote", self.inner.promote(request).await)
    }

    async fn demote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.observe("demote", self.inner.demote(request).await)
    }

    async fn resync(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.observe("resync", self.inner.resync(request).await)
    }

    async fn create_group(&self, request: &CreateGroupRequest) -> Result<GroupResponse, AgentError> {
        self.observe("create_group", self.inner.create_group(request).await)
    }

    async fn add_volume_to_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError> {
        self.observe("add_volume_to_group", self.inner.add_volume_to_group(request).await)
    }

    async fn remove_volume_from_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError> {
        self.observe("remove_volume_from_group", self.inner.remove_volume_from_group(request).await)
    }

    async fn delete_group(&self, request: &DeleteGroupRequest) -> Result<(), AgentError> {
        self.observe("delete_group", self.inner.delete_group(request).await)
    }
}
