//! Mock AgentClient for unit testing
//!
//! Keeps a small in-memory model of the backend (fenced CIDRs, replication
//! relationships, volume groups) and records every call, so tests can assert
//! both the resulting backend state and how many calls a reconcile made.
//! Failures are injected per operation with `fail_next`.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tonic::Code;

use crate::agent_trait::AgentClientTrait;
use crate::error::AgentError;
use crate::models::*;

/// One recorded agent call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Operation name (e.g., "promote")
    pub operation: String,
    /// Handle or CIDR list the call targeted
    pub target: String,
}

/// Backend role of a replicated volume or group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockRole {
    /// Enabled and primary
    Primary,
    /// Enabled and secondary
    Secondary,
}

/// Mock AgentClient for testing
#[derive(Clone, Default)]
pub struct MockAgentClient {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    failures: Arc<Mutex<HashMap<String, VecDeque<AgentError>>>>,
    missing_volumes: Arc<Mutex<HashSet<String>>>,
    fenced: Arc<Mutex<BTreeSet<String>>>,
    replication: Arc<Mutex<HashMap<String, MockRole>>>,
    groups: Arc<Mutex<HashMap<String, BTreeSet<String>>>>,
    group_names: Arc<Mutex<HashMap<String, String>>>,
    resync_states: Arc<Mutex<VecDeque<SyncState>>>,
}

impl std::fmt::Debug for MockAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAgentClient")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

impl MockAgentClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` fail with `error` (queued, FIFO)
    pub fn fail_next(&self, operation: &str, error: AgentError) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Sync state reported by the next resync call (queued, FIFO); resync
    /// reports `Resyncing` once the queue is empty
    pub fn report_resync(&self, state: SyncState) {
        self.resync_states.lock().unwrap().push_back(state);
    }

    /// Make every volume operation on `handle` fail with NotFound
    pub fn mark_volume_missing(&self, handle: impl Into<String>) {
        self.missing_volumes.lock().unwrap().insert(handle.into());
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of calls of one operation so far
    pub fn calls_of(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// CIDRs currently fenced
    pub fn fenced_cidrs(&self) -> BTreeSet<String> {
        self.fenced.lock().unwrap().clone()
    }

    /// Role of a replicated handle, `None` when replication is disabled
    pub fn role(&self, handle: &str) -> Option<MockRole> {
        self.replication.lock().unwrap().get(handle).copied()
    }

    /// Members of a group, `None` when the group does not exist
    pub fn group_members(&self, group_handle: &str) -> Option<BTreeSet<String>> {
        self.groups.lock().unwrap().get(group_handle).cloned()
    }

    /// Number of groups currently present
    pub fn group_count(&self) -> usize {
        self.groups.lock().unwrap().len()
    }

    fn record(&self, operation: &str, target: &str) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push(RecordedCall {
            operation: operation.to_string(),
            target: target.to_string(),
        });
        let injected = self
            .failures
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_volume(&self, handle: &str) -> Result<(), AgentError> {
        if self.missing_volumes.lock().unwrap().contains(handle) {
            return Err(AgentError::status(Code::NotFound, format!("volume {handle} not found")));
        }
        Ok(())
    }

    fn check_source(&self, source: &ReplicationSource) -> Result<(), AgentError> {
        match source {
            ReplicationSource::Volume(handle) => self.check_volume(handle),
            ReplicationSource::Group(handle) => {
                if self.groups.lock().unwrap().contains_key(handle) {
                    Ok(())
                } else {
                    Err(AgentError::status(Code::NotFound, format!("group {handle} not found")))
                }
            }
        }
    }

    fn set_role(&self, request: &ReplicationRequest, role: MockRole) -> Result<ReplicationResponse, AgentError> {
        self.check_source(&request.source)?;
        let mut replication = self.replication.lock().unwrap();
        let handle = request.source.handle();
        if !replication.contains_key(handle) {
            return Err(AgentError::status(
                Code::FailedPrecondition,
                format!("replication is not enabled for {handle}"),
            ));
        }
        replication.insert(handle.to_string(), role);
        Ok(ReplicationResponse {
            sync_state: SyncState::Synced,
            ..Default::default()
        })
    }

    fn group_response(&self, group_handle: &str) -> GroupResponse {
        GroupResponse {
            group_handle: group_handle.to_string(),
            volume_handles: self
                .groups
                .lock()
                .unwrap()
                .get(group_handle)
                .map(|members| members.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

#[async_trait::async_trait]
impl AgentClientTrait for MockAgentClient {
    async fn fence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError> {
        self.record("fence", &request.cidrs.join(","))?;
        self.fenced.lock().unwrap().extend(request.cidrs.iter().cloned());
        Ok(OperationResponse::default())
    }

    async fn unfence(&self, request: &FenceRequest) -> Result<OperationResponse, AgentError> {
        self.record("unfence", &request.cidrs.join(","))?;
        let mut fenced = self.fenced.lock().unwrap();
        for cidr in &request.cidrs {
            fenced.remove(cidr);
        }
        Ok(OperationResponse::default())
    }

    async fn reclaim_space(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError> {
        self.record("reclaim_space", &request.volume_handle)?;
        self.check_volume(&request.volume_handle)?;
        Ok(OperationResponse {
            message: None,
            pre_usage_bytes: Some(10 << 30),
            post_usage_bytes: Some(4 << 30),
        })
    }

    async fn rotate_key(&self, request: &VolumeRequest) -> Result<OperationResponse, AgentError> {
        self.record("rotate_key", &request.volume_handle)?;
        self.check_volume(&request.volume_handle)?;
        Ok(OperationResponse::default())
    }

    async fn enable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.record("enable_replication", request.source.handle())?;
        self.check_source(&request.source)?;
        // Enabling an enabled relationship keeps its role
        self.replication
            .lock()
            .unwrap()
            .entry(request.source.handle().to_string())
            .or_insert(MockRole::Primary);
        Ok(ReplicationResponse {
            sync_state: SyncState::Syncing,
            ..Default::default()
        })
    }

    async fn disable_replication(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.record("disable_replication", request.source.handle())?;
        let removed = self.replication.lock().unwrap().remove(request.source.handle());
        match removed {
            Some(_) => Ok(ReplicationResponse::default()),
            None => Err(AgentError::status(
                Code::NotFound,
                format!("no replication for {}", request.source.handle()),
            )),
        }
    }

    async fn promote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.record("promote", request.source.handle())?;
        self.set_role(request, MockRole::Primary)
    }

    async fn demote(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.record("demote", request.source.handle())?;
        self.set_role(request, MockRole::Secondary)
    }

    async fn resync(&self, request: &ReplicationRequest) -> Result<ReplicationResponse, AgentError> {
        self.record("resync", request.source.handle())?;
        self.set_role(request, MockRole::Secondary)?;
        let sync_state = self
            .resync_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SyncState::Resyncing);
        Ok(ReplicationResponse {
            sync_state,
            message: (sync_state == SyncState::Resyncing).then(|| "resync started".to_string()),
            last_sync_time: None,
        })
    }

    async fn create_group(&self, request: &CreateGroupRequest) -> Result<GroupResponse, AgentError> {
        self.record("create_group", &request.name)?;
        for handle in &request.volume_handles {
            self.check_volume(handle)?;
        }
        // Same name, same group
        let existing = self.group_names.lock().unwrap().get(&request.name).cloned();
        let group_handle = match existing {
            Some(handle) => handle,
            None => {
                let handle = format!("group-{}", uuid::Uuid::new_v4());
                self.group_names
                    .lock()
                    .unwrap()
                    .insert(request.name.clone(), handle.clone());
                handle
            }
        };
        self.groups
            .lock()
            .unwrap()
            .insert(group_handle.clone(), request.volume_handles.iter().cloned().collect());
        Ok(self.group_response(&group_handle))
    }

    async fn add_volume_to_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError> {
        self.record("add_volume_to_group", &request.volume_handle)?;
        self.check_volume(&request.volume_handle)?;
        {
            let mut groups = self.groups.lock().unwrap();
            let members = groups.get_mut(&request.group_handle).ok_or_else(|| {
                AgentError::status(Code::NotFound, format!("group {} not found", request.group_handle))
            })?;
            members.insert(request.volume_handle.clone());
        }
        Ok(self.group_response(&request.group_handle))
    }

    async fn remove_volume_from_group(&self, request: &GroupMemberRequest) -> Result<GroupResponse, AgentError> {
        self.record("remove_volume_from_group", &request.volume_handle)?;
        {
            let mut groups = self.groups.lock().unwrap();
            let members = groups.get_mut(&request.group_handle).ok_or_else(|| {
                AgentError::status(Code::NotFound, format!("group {} not found", request.group_handle))
            })?;
            // Removing an absent member is a success
            members.remove(&request.volume_handle);
        }
        Ok(self.group_response(&request.group_handle))
    }

    async fn delete_group(&self, request: &DeleteGroupRequest) -> Result<(), AgentError> {
        self.record("delete_group", &request.group_handle)?;
        let removed = self.groups.lock().unwrap().remove(&request.group_handle);
        self.group_names
            .lock()
            .unwrap()
            .retain(|_, handle| handle != &request.group_handle);
        match removed {
            Some(_) => Ok(()),
            None => Err(AgentError::status(
                Code::NotFound,
                format!("group {} not found", request.group_handle),
            )),
        }
    }
}
