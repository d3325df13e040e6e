// ── Conflict resolution ──
//
// Last-write-wins between a local and a remote copy of one resource.
// Ties keep the local copy so that no write is issued for it.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Resource, ResourceId};

/// Which side won a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// Resolve one resource. `None` only when neither side has a copy.
pub fn resolve<'a>(
    local: Option<&'a Resource>,
    remote: Option<&'a Resource>,
) -> Option<(Winner, &'a Resource)> {
    match (local, remote) {
        (None, None) => None,
        (Some(local), None) => Some((Winner::Local, local)),
        (None, Some(remote)) => Some((Winner::Remote, remote)),
        (Some(local), Some(remote)) => {
            if remote.updated_at > local.updated_at {
                Some((Winner::Remote, remote))
            } else {
                Some((Winner::Local, local))
            }
        }
    }
}

/// Outcome of reconciling a local set against a cloud result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Winning copy of every id known on either side, ordered by id.
    pub resolved: Vec<Resource>,
    /// Remote winners that must be written to the local store.
    pub to_persist: Vec<Resource>,
}

/// Reconcile the union of local and cloud ids.
///
/// Ids with an unconfirmed local delete are skipped entirely so a stale
/// cloud read cannot resurrect them.
pub fn reconcile(
    local: &[Resource],
    cloud: &[Resource],
    deleted_ids: &BTreeSet<ResourceId>,
) -> Reconciliation {
    let mut pairs: BTreeMap<&ResourceId, (Option<&Resource>, Option<&Resource>)> = BTreeMap::new();
    for resource in local {
        pairs.entry(&resource.resource_id).or_default().0 = Some(resource);
    }
    for resource in cloud {
        pairs.entry(&resource.resource_id).or_default().1 = Some(resource);
    }

    let mut outcome = Reconciliation::default();
    for (id, (local, remote)) in pairs {
        if deleted_ids.contains(id) {
            continue;
        }
        if let Some((winner, resource)) = resolve(local, remote) {
            if winner == Winner::Remote {
                outcome.to_persist.push(resource.clone());
            }
            outcome.resolved.push(resource.clone());
        }
    }
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    fn resource(id: &str, name: &str, updated: i64) -> Resource {
        Resource::new(
            "folder",
            id,
            json!({ "name": name }).as_object().cloned().unwrap(),
            at(updated),
        )
    }

    #[test]
    fn resolve_prefers_only_present_side() {
        let local = resource("a", "local", 0);
        let remote = resource("a", "remote", 0);

        assert_eq!(resolve(None, None), None);
        assert_eq!(resolve(Some(&local), None), Some((Winner::Local, &local)));
        assert_eq!(resolve(None, Some(&remote)), Some((Winner::Remote, &remote)));
    }

    #[test]
    fn resolve_uses_strictly_newer_remote() {
        let local = resource("a", "local", 10);
        let older = resource("a", "remote", 5);
        let same = resource("a", "remote", 10);
        let newer = resource("a", "remote", 11);

        assert_eq!(resolve(Some(&local), Some(&older)).unwrap().0, Winner::Local);
        assert_eq!(resolve(Some(&local), Some(&same)).unwrap().0, Winner::Local);
        assert_eq!(resolve(Some(&local), Some(&newer)).unwrap().0, Winner::Remote);
    }

    #[test]
    fn reconcile_covers_union_of_ids() {
        let local = vec![resource("a", "local-a", 10), resource("b", "local-b", 10)];
        let cloud = vec![resource("b", "cloud-b", 20), resource("c", "cloud-c", 1)];

        let outcome = reconcile(&local, &cloud, &BTreeSet::new());

        let names: Vec<_> = outcome
            .resolved
            .iter()
            .map(|r| r.data["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["local-a", "cloud-b", "cloud-c"]);
        assert_eq!(outcome.to_persist, vec![cloud[0].clone(), cloud[1].clone()]);
    }

    #[test]
    fn reconcile_skips_pending_deletes() {
        let cloud = vec![resource("gone", "stale", 50)];
        let deleted: BTreeSet<ResourceId> = [ResourceId::from("gone")].into();

        let outcome = reconcile(&[], &cloud, &deleted);

        assert!(outcome.resolved.is_empty());
        assert!(outcome.to_persist.is_empty());
    }
}
