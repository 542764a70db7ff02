use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    domain::{Group, GroupId},
    errors::SchedulerFault,
    ports::GroupRepository,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    Registered(Group),
    AlreadyRegistered(Group),
}

impl Registration {
    pub fn group(&self) -> &Group {
        match self {
            Self::Registered(g) | Self::AlreadyRegistered(g) => g,
        }
    }
}

/// Owner of group records. Groups are never deleted, only deactivated.
///
/// Every read-modify-write goes through `writes`, so a distribution tick and
/// an operator command never overwrite each other's fields.
pub struct GroupRegistry {
    repo: Arc<dyn GroupRepository>,
    writes: Mutex<()>,
}

impl GroupRegistry {
    pub fn new(repo: Arc<dyn GroupRepository>) -> Self {
        Self {
            repo,
            writes: Mutex::new(()),
        }
    }

    pub async fn register(&self, group: Group) -> Result<Registration> {
        let _write = self.writes.lock().await;
        if let Some(existing) = self.repo.find_by_id(group.id).await? {
            return Ok(Registration::AlreadyRegistered(existing));
        }
        self.repo.upsert(group.clone()).await?;
        tracing::info!(group = %group.id, name = %group.name, "group registered");
        Ok(Registration::Registered(group))
    }

    /// Active groups in registration order, for a distribution tick.
    pub async fn active_groups(&self) -> std::result::Result<Vec<Group>, SchedulerFault> {
        self.repo.list_active().await.map_err(|e| {
            tracing::warn!(error = %e, "group repository failed to list active groups");
            SchedulerFault::RegistryUnavailable
        })
    }

    /// Fold a tick's work into the stored record: `added` more members and,
    /// when given, a new `last_distributed_at`. Activation and schedule are
    /// taken from the stored record, not from the tick's snapshot.
    pub async fn record_distribution(
        &self,
        id: GroupId,
        added: u64,
        distributed_at: Option<DateTime<Utc>>,
    ) -> std::result::Result<(), SchedulerFault> {
        let unavailable = |e: crate::Error| {
            tracing::warn!(group = %id, error = %e, "group repository failed to persist distribution");
            SchedulerFault::RegistryUnavailable
        };

        let _write = self.writes.lock().await;
        let Some(mut group) = self.repo.find_by_id(id).await.map_err(unavailable)? else {
            tracing::warn!(group = %id, added, "distributed group no longer registered");
            return Ok(());
        };
        group.record_added(added);
        if let Some(at) = distributed_at {
            group.last_distributed_at = Some(at);
        }
        self.repo.upsert(group).await.map_err(unavailable)
    }

    /// Returns `false` when the group is unknown.
    pub async fn deactivate(&self, id: GroupId) -> Result<bool> {
        let _write = self.writes.lock().await;
        let Some(mut group) = self.repo.find_by_id(id).await? else {
            return Ok(false);
        };
        if group.is_active {
            group.is_active = false;
            self.repo.upsert(group).await?;
            tracing::info!(group = %id, "group deactivated");
        }
        Ok(true)
    }

    /// Apply one cadence/batch size to every group.
    pub async fn apply_schedule(&self, cadence_minutes: u32, batch_size: u32) -> Result<usize> {
        let _write = self.writes.lock().await;
        let groups = self.repo.list_all().await?;
        let n = groups.len();
        for mut group in groups {
            group.set_schedule(cadence_minutes, batch_size)?;
            self.repo.upsert(group).await?;
        }
        Ok(n)
    }

    pub async fn find(&self, id: GroupId) -> Result<Option<Group>> {
        self.repo.find_by_id(id).await
    }

    pub async fn list(&self) -> Result<Vec<Group>> {
        self.repo.list_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGroupRepository;

    fn registry() -> GroupRegistry {
        GroupRegistry::new(Arc::new(InMemoryGroupRepository::new()))
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let reg = registry();
        let g = Group::new(GroupId(-10), "ten", 2, 5).unwrap();
        assert!(matches!(
            reg.register(g.clone()).await.unwrap(),
            Registration::Registered(_)
        ));
        let again = Group::new(GroupId(-10), "renamed", 2, 5).unwrap();
        match reg.register(again).await.unwrap() {
            Registration::AlreadyRegistered(existing) => assert_eq!(existing.name, "ten"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(reg.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deactivated_groups_drop_out_of_active_list() {
        let reg = registry();
        reg.register(Group::new(GroupId(-1), "a", 2, 5).unwrap())
            .await
            .unwrap();
        reg.register(Group::new(GroupId(-2), "b", 2, 5).unwrap())
            .await
            .unwrap();
        assert!(reg.deactivate(GroupId(-1)).await.unwrap());
        assert!(!reg.deactivate(GroupId(-3)).await.unwrap());

        let active = reg.active_groups().await.unwrap();
        assert_eq!(active.iter().map(|g| g.id).collect::<Vec<_>>(), vec![GroupId(-2)]);
        assert_eq!(reg.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn apply_schedule_updates_all_groups() {
        let reg = registry();
        reg.register(Group::new(GroupId(-1), "a", 2, 5).unwrap())
            .await
            .unwrap();
        assert_eq!(reg.apply_schedule(7, 9).await.unwrap(), 1);
        let g = reg.find(GroupId(-1)).await.unwrap().unwrap();
        assert_eq!(g.cadence_minutes(), 7);
        assert_eq!(g.batch_size(), 9);
    }

    #[tokio::test]
    async fn recorded_distribution_keeps_operator_fields() {
        let reg = registry();
        reg.register(Group::new(GroupId(-1), "a", 2, 5).unwrap())
            .await
            .unwrap();
        reg.deactivate(GroupId(-1)).await.unwrap();
        reg.apply_schedule(9, 3).await.unwrap();

        let at = chrono::Utc::now();
        reg.record_distribution(GroupId(-1), 2, Some(at)).await.unwrap();
        reg.record_distribution(GroupId(-1), 1, None).await.unwrap();

        let g = reg.find(GroupId(-1)).await.unwrap().unwrap();
        assert!(!g.is_active);
        assert_eq!(g.cadence_minutes(), 9);
        assert_eq!(g.added_count(), 3);
        assert_eq!(g.last_distributed_at, Some(at));

        // Unknown groups are ignored rather than recreated.
        reg.record_distribution(GroupId(-9), 1, Some(at)).await.unwrap();
        assert!(reg.find(GroupId(-9)).await.unwrap().is_none());
    }
}
