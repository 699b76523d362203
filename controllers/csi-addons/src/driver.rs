//! Reconcile loop driver
//!
//! One generic pass for every kind: read the object fresh from the store,
//! run either its cleanup (deletion requested) or its apply step, then turn
//! the outcome into a requeue. Conflicts restart the pass from a fresh read;
//! other errors never escape past [`Reconciler::drive`].

use std::time::Duration;

use kube::Resource;
use kube_runtime::controller::Action;
use tracing::{debug, error, warn};

use cluster_store::ResourceStore;

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::finalizer::is_deleting;
use crate::reconciler::Reconciler;

/// Inline restarts of a pass that lost a write race
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Requeue after the inline conflict retries are used up
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue after a store or API error
const TRANSIENT_REQUEUE: Duration = Duration::from_secs(5);

/// Result of one apply or cleanup step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Observed state matches the spec
    Synced,
    /// Progress was made and more steps are pending
    Continue,
    /// Check again after this delay
    RequeueAfter(Duration),
    /// An agent call failed; status records why
    AgentFailed,
    /// The spec or inventory must change before progress is possible
    Blocked,
    /// Nothing left to do for this object
    Done,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Synced => "synced",
            Outcome::Continue => "continue",
            Outcome::RequeueAfter(_) => "requeue",
            Outcome::AgentFailed => "agent_failed",
            Outcome::Blocked => "blocked",
            Outcome::Done => "done",
        }
    }
}

/// When the driver wants to see an object again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// After a delay (zero means right away)
    After(Duration),
    /// Only when the object changes
    AwaitChange,
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::After(delay) => Action::requeue(delay),
            Requeue::AwaitChange => Action::await_change(),
        }
    }
}

/// Per-kind reconcile steps
#[async_trait::async_trait]
pub trait Reconcile<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// Store the driver reads the object from
    fn store(&self) -> &dyn ResourceStore<K>;

    /// Moves a live object towards its spec
    async fn apply(&self, object: K) -> Result<Outcome, ControllerError>;

    /// Runs deletion ordering for an object whose deletion was requested
    async fn cleanup(&self, _object: K) -> Result<Outcome, ControllerError> {
        Ok(Outcome::Done)
    }
}

impl Reconciler {
    /// Runs one pass for `namespace/name` and picks the requeue
    pub async fn drive<K>(&self, namespace: Option<&str>, name: &str) -> Requeue
    where
        K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
        Reconciler: Reconcile<K>,
    {
        let kind = K::kind(&()).to_string();
        let key = match namespace {
            Some(namespace) => format!("{}/{}/{}", kind, namespace, name),
            None => format!("{}/{}", kind, name),
        };

        let mut conflicts = 0;
        loop {
            match self.pass::<K>(namespace, name).await {
                Ok(outcome) => {
                    self.metrics.record_reconcile(&kind, outcome.label());
                    return self.requeue_for(&key, outcome).await;
                }
                Err(e) if e.is_conflict() && conflicts < MAX_CONFLICT_RETRIES => {
                    conflicts += 1;
                    debug!("Conflict writing {}, retrying from a fresh read ({})", key, conflicts);
                }
                Err(e) if e.is_conflict() => {
                    self.metrics.record_reconcile(&kind, "conflict");
                    debug!("Conflicts persist for {}: {}", key, e);
                    return Requeue::After(CONFLICT_REQUEUE);
                }
                Err(e) if e.is_transient() => {
                    self.metrics.record_reconcile(&kind, "error");
                    warn!("Reconcile of {} failed, retrying: {}", key, e);
                    return Requeue::After(TRANSIENT_REQUEUE);
                }
                Err(e) => {
                    self.metrics.record_reconcile(&kind, "error");
                    error!("Reconcile of {} failed: {}", key, e);
                    return Requeue::After(self.next_backoff(&key).await);
                }
            }
        }
    }

    async fn pass<K>(&self, namespace: Option<&str>, name: &str) -> Result<Outcome, ControllerError>
    where
        K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
        Reconciler: Reconcile<K>,
    {
        let Some(object) = <Self as Reconcile<K>>::store(self).get(namespace, name).await? else {
            return Ok(Outcome::Done);
        };
        if is_deleting(&object) {
            <Self as Reconcile<K>>::cleanup(self, object).await
        } else {
            <Self as Reconcile<K>>::apply(self, object).await
        }
    }

    async fn requeue_for(&self, key: &str, outcome: Outcome) -> Requeue {
        match outcome {
            Outcome::Synced | Outcome::Blocked => {
                if outcome == Outcome::Synced {
                    self.reset_backoff(key).await;
                }
                Requeue::After(self.config.resync_interval)
            }
            Outcome::Continue => Requeue::After(Duration::ZERO),
            Outcome::RequeueAfter(delay) => Requeue::After(delay),
            Outcome::AgentFailed => Requeue::After(self.next_backoff(key).await),
            Outcome::Done => {
                self.backoff_states.lock().await.remove(key);
                Requeue::AwaitChange
            }
        }
    }

    async fn next_backoff(&self, key: &str) -> Duration {
        let mut states = self.backoff_states.lock().await;
        states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.config.backoff_min, self.config.backoff_max))
            .next_backoff()
    }

    async fn reset_backoff(&self, key: &str) {
        if let Some(backoff) = self.backoff_states.lock().await.get_mut(key) {
            backoff.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_to_action() {
        assert_eq!(Action::from(Requeue::After(Duration::from_secs(5))), Action::requeue(Duration::from_secs(5)));
        assert_eq!(Action::from(Requeue::AwaitChange), Action::await_change());
    }

    #[test]
    fn test_outcome_labels_are_distinct() {
        let labels = [
            Outcome::Synced.label(),
            Outcome::Continue.label(),
            Outcome::RequeueAfter(Duration::ZERO).label(),
            Outcome::AgentFailed.label(),
            Outcome::Blocked.label(),
            Outcome::Done.label(),
        ];
        let unique: std::collections::BTreeSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
