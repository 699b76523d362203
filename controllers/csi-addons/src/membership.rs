//! Group membership tracker
//!
//! Members are recomputed from scratch on every pass: the claims in the
//! intent's namespace that match the selector and are bound to a CSI volume.
//! The only remembered membership is the handle list in the content
//! resource, which [`plan`] diffs against one step at a time.

use std::collections::{BTreeMap, BTreeSet};

use crds::LabelSelector;

/// Backend volume behind a bound claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundVolume {
    /// CSI volume handle
    pub volume_handle: String,
    /// CSI driver name
    pub driver: String,
    /// PersistentVolume name
    pub pv_name: String,
}

/// What the tracker needs to know about one claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSnapshot {
    /// Claim name
    pub name: String,
    /// Claim labels
    pub labels: BTreeMap<String, String>,
    /// Volume, when the claim is bound to a CSI volume
    pub volume: Option<BoundVolume>,
}

/// A resolved group member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Claim name
    pub claim: String,
    /// Volume behind the claim
    pub volume: BoundVolume,
}

/// Members selected by `selector`, sorted by claim name.
///
/// Claims that match but are not bound are left out entirely.
pub fn resolve_members(selector: &LabelSelector, inventory: &[ClaimSnapshot]) -> Vec<Member> {
    let mut members: Vec<Member> = inventory
        .iter()
        .filter(|claim| selector.matches(&claim.labels))
        .filter_map(|claim| {
            claim.volume.as_ref().map(|volume| Member {
                claim: claim.name.clone(),
                volume: volume.clone(),
            })
        })
        .collect();
    members.sort_by(|a, b| a.claim.cmp(&b.claim));
    members
}

/// Next change needed to bring the backend group in line with the members
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipStep {
    /// No group yet; create it with these handles
    CreateGroup {
        /// Initial members
        handles: Vec<String>,
    },
    /// Remove a handle that is no longer selected
    Remove(String),
    /// Add a newly selected handle
    Add(String),
    /// Recorded handles equal the desired handles
    Converged,
}

/// Diffs recorded against desired handles.
///
/// Only one step is returned per call, so no two operations on the group
/// are ever in flight for one intent. Removals go first.
pub fn plan(group_handle: Option<&str>, recorded: &[String], desired: &[String]) -> MembershipStep {
    let desired_set: BTreeSet<&String> = desired.iter().collect();

    if group_handle.is_none_or(str::is_empty) {
        return MembershipStep::CreateGroup {
            handles: desired_set.into_iter().cloned().collect(),
        };
    }

    let recorded_set: BTreeSet<&String> = recorded.iter().collect();
    if let Some(stale) = recorded_set.difference(&desired_set).next() {
        return MembershipStep::Remove((*stale).clone());
    }
    if let Some(missing) = desired_set.difference(&recorded_set).next() {
        return MembershipStep::Add((*missing).clone());
    }
    MembershipStep::Converged
}

/// Applies a successful step to the recorded handle list, keeping it sorted
pub fn record(recorded: &mut Vec<String>, step: &MembershipStep) {
    match step {
        MembershipStep::CreateGroup { handles } => *recorded = handles.clone(),
        MembershipStep::Remove(handle) => recorded.retain(|h| h != handle),
        MembershipStep::Add(handle) => {
            if !recorded.contains(handle) {
                recorded.push(handle.clone());
            }
        }
        MembershipStep::Converged => {}
    }
    recorded.sort();
    recorded.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(name: &str, group: &str, bound: bool) -> ClaimSnapshot {
        ClaimSnapshot {
            name: name.to_string(),
            labels: BTreeMap::from([("group".to_string(), group.to_string())]),
            volume: bound.then(|| BoundVolume {
                volume_handle: format!("handle-{name}"),
                driver: "rbd.csi.ceph.com".to_string(),
                pv_name: format!("pv-{name}"),
            }),
        }
    }

    fn handles(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_resolve_selects_bound_matching_claims() {
        let inventory = vec![
            claim("db-2", "a", true),
            claim("db-1", "a", true),
            claim("db-3", "a", false),
            claim("web", "b", true),
        ];
        let members = resolve_members(&LabelSelector::from_label("group", "a"), &inventory);

        let names: Vec<&str> = members.iter().map(|m| m.claim.as_str()).collect();
        assert_eq!(names, vec!["db-1", "db-2"]);
    }

    #[test]
    fn test_plan_creates_group_first() {
        let step = plan(None, &[], &handles(&["h2", "h1"]));
        assert_eq!(
            step,
            MembershipStep::CreateGroup {
                handles: handles(&["h1", "h2"])
            }
        );
    }

    #[test]
    fn test_plan_removes_before_adding() {
        let step = plan(Some("g"), &handles(&["h1", "h2"]), &handles(&["h1", "h3"]));
        assert_eq!(step, MembershipStep::Remove("h2".to_string()));

        let step = plan(Some("g"), &handles(&["h1"]), &handles(&["h1", "h3"]));
        assert_eq!(step, MembershipStep::Add("h3".to_string()));

        let step = plan(Some("g"), &handles(&["h1", "h3"]), &handles(&["h3", "h1"]));
        assert_eq!(step, MembershipStep::Converged);
    }

    #[test]
    fn test_record_keeps_sorted_unique_handles() {
        let mut recorded = handles(&["h3"]);
        record(&mut recorded, &MembershipStep::Add("h1".to_string()));
        record(&mut recorded, &MembershipStep::Add("h1".to_string()));
        assert_eq!(recorded, handles(&["h1", "h3"]));

        record(&mut recorded, &MembershipStep::Remove("h3".to_string()));
        assert_eq!(recorded, handles(&["h1"]));
    }
}
