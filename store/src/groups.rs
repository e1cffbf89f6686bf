use crate::errors::Result;
use crate::types::{Group, GroupId, GroupSeed, ProjectId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Issue/group resolution keyed by fingerprint.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Atomic insert-or-fetch on (project_id, fingerprint).
    ///
    /// On first sight the group is created from `seed` with `times_seen = 1`
    /// and both seen timestamps set to `seed.timestamp`. Every later call
    /// increments `times_seen` and extends the seen range to cover
    /// `seed.timestamp`, so out-of-order delivery cannot corrupt it. Returns
    /// the updated group and whether this call created it.
    ///
    /// Concurrent callers with the same fingerprint must converge on a
    /// single group. Database-backed implementations get this from a unique
    /// index on (project_id, fingerprint) with an insert that falls back to
    /// an update on conflict.
    async fn get_or_create_by_fingerprint(
        &self,
        project_id: ProjectId,
        fingerprint: &str,
        seed: GroupSeed,
    ) -> Result<(Group, bool)>;

    async fn get(&self, project_id: ProjectId, group_id: GroupId) -> Result<Option<Group>>;
}

struct GroupsInner {
    by_fingerprint: HashMap<(ProjectId, String), GroupId>,
    groups: HashMap<GroupId, Group>,
    next_id: GroupId,
}

/// In-memory group store. A single write lock spans lookup and mutation, so
/// the insert-or-fetch is atomic by construction.
pub struct MemoryGroupStore {
    inner: RwLock<GroupsInner>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        MemoryGroupStore {
            inner: RwLock::new(GroupsInner {
                by_fingerprint: HashMap::new(),
                groups: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().groups.is_empty()
    }
}

impl Default for MemoryGroupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn get_or_create_by_fingerprint(
        &self,
        project_id: ProjectId,
        fingerprint: &str,
        seed: GroupSeed,
    ) -> Result<(Group, bool)> {
        let mut inner = self.inner.write();

        if let Some(&id) = inner.by_fingerprint.get(&(project_id, fingerprint.to_string())) {
            let group = inner
                .groups
                .get_mut(&id)
                .expect("fingerprint index points at a live group");
            group.times_seen += 1;
            group.first_seen = group.first_seen.min(seed.timestamp);
            group.last_seen = group.last_seen.max(seed.timestamp);
            return Ok((group.clone(), false));
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let group = Group {
            id,
            project_id,
            fingerprint: fingerprint.to_string(),
            title: seed.title,
            culprit: seed.culprit,
            times_seen: 1,
            first_seen: seed.timestamp,
            last_seen: seed.timestamp,
        };
        inner
            .by_fingerprint
            .insert((project_id, fingerprint.to_string()), id);
        inner.groups.insert(id, group.clone());

        Ok((group, true))
    }

    async fn get(&self, project_id: ProjectId, group_id: GroupId) -> Result<Option<Group>> {
        Ok(self
            .inner
            .read()
            .groups
            .get(&group_id)
            .filter(|group| group.project_id == project_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::macros::datetime;
    use tokio::task::JoinSet;

    fn seed(timestamp: time::OffsetDateTime) -> GroupSeed {
        GroupSeed {
            title: "ValueError: boom".to_string(),
            culprit: Some("app in run".to_string()),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_create_then_match() {
        let store = MemoryGroupStore::new();
        let first = datetime!(2024-05-01 10:00:00 UTC);
        let second = datetime!(2024-05-01 11:00:00 UTC);

        let (group, created) = store
            .get_or_create_by_fingerprint(1, "fp", seed(first))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(group.times_seen, 1);
        assert_eq!(group.first_seen, first);
        assert_eq!(group.last_seen, first);

        let (group, created) = store
            .get_or_create_by_fingerprint(1, "fp", seed(second))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(group.times_seen, 2);
        assert_eq!(group.first_seen, first);
        assert_eq!(group.last_seen, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_timestamps_extend_range_backwards() {
        let store = MemoryGroupStore::new();
        let late = datetime!(2024-05-01 12:00:00 UTC);
        let early = datetime!(2024-05-01 09:00:00 UTC);

        store
            .get_or_create_by_fingerprint(1, "fp", seed(late))
            .await
            .unwrap();
        let (group, _) = store
            .get_or_create_by_fingerprint(1, "fp", seed(early))
            .await
            .unwrap();

        assert_eq!(group.first_seen, early);
        assert_eq!(group.last_seen, late);
    }

    #[tokio::test]
    async fn test_same_fingerprint_different_projects() {
        let store = MemoryGroupStore::new();
        let at = datetime!(2024-05-01 10:00:00 UTC);

        let (a, _) = store
            .get_or_create_by_fingerprint(1, "fp", seed(at))
            .await
            .unwrap();
        let (b, created) = store
            .get_or_create_by_fingerprint(2, "fp", seed(at))
            .await
            .unwrap();

        assert!(created);
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creators_converge() {
        let store = Arc::new(MemoryGroupStore::new());
        let at = datetime!(2024-05-01 10:00:00 UTC);

        let mut tasks = JoinSet::new();
        for _ in 0..32 {
            let store = store.clone();
            tasks.spawn(async move {
                store
                    .get_or_create_by_fingerprint(1, "fp", seed(at))
                    .await
                    .unwrap()
            });
        }

        let mut created_count = 0;
        let mut group_ids = Vec::new();
        while let Some(result) = tasks.join_next().await {
            let (group, created) = result.unwrap();
            if created {
                created_count += 1;
            }
            group_ids.push(group.id);
        }

        assert_eq!(created_count, 1);
        assert!(group_ids.iter().all(|&id| id == group_ids[0]));
        let group = store.get(1, group_ids[0]).await.unwrap().unwrap();
        assert_eq!(group.times_seen, 32);
    }
}
