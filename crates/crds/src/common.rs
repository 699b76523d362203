//! Types shared by every CSI-Addons resource
//!
//! Status conditions, one-shot operation results and the class/inline
//! parameter merge used by intents that reference a class resource.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// The condition holds
    True,

    /// The condition does not hold
    False,

    /// The controller cannot tell
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Maps a boolean onto `True`/`False`
    pub fn from_bool(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

/// Status condition in the common shape used by every resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., "Completed", "Degraded")
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status
    pub status: ConditionStatus,

    /// Machine-readable reason in CamelCase
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the status value changed
    pub last_transition_time: DateTime<Utc>,

    /// Generation of the resource this condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Creates a condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Sets the generation this condition was observed at
    #[must_use]
    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Inserts or updates a condition by type.
///
/// `lastTransitionTime` is only moved when the status value changes, so
/// repeated reconciles with the same outcome leave the timestamp alone.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.last_transition_time = condition.last_transition_time;
            }
            existing.status = condition.status;
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        None => conditions.push(condition),
    }
}

/// Finds a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Returns true when the condition exists and is `True`
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Result of a one-shot or fencing operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation completed successfully
    Succeeded,

    /// Operation failed
    Failed,
}

/// Merges class parameters with inline overrides; inline keys win.
pub fn merge_parameters(
    class: &BTreeMap<String, String>,
    inline: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = class.clone();
    for (key, value) in inline {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
