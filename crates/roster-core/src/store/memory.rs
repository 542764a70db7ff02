use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{Group, GroupId, Identifier, IdentifierId},
    ports::{GroupRepository, IdentifierAudit},
    Result,
};

/// Groups kept in registration order.
#[derive(Debug, Default)]
pub struct InMemoryGroupRepository {
    groups: Mutex<Vec<Group>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: Vec<Group>) -> Self {
        Self {
            groups: Mutex::new(groups),
        }
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn find_by_id(&self, id: GroupId) -> Result<Option<Group>> {
        let groups = self.groups.lock().await;
        Ok(groups.iter().find(|g| g.id == id).cloned())
    }

    async fn upsert(&self, group: Group) -> Result<()> {
        let mut groups = self.groups.lock().await;
        upsert_in_order(&mut groups, group);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Group>> {
        let groups = self.groups.lock().await;
        Ok(groups.iter().filter(|g| g.is_active).cloned().collect())
    }

    async fn list_all(&self) -> Result<Vec<Group>> {
        Ok(self.groups.lock().await.clone())
    }
}

/// Replace in place (keeps registration order) or append.
pub(crate) fn upsert_in_order(groups: &mut Vec<Group>, group: Group) {
    match groups.iter_mut().find(|g| g.id == group.id) {
        Some(slot) => *slot = group,
        None => groups.push(group),
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIdentifierAudit {
    records: Mutex<HashMap<IdentifierId, Identifier>>,
}

impl InMemoryIdentifierAudit {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentifierAudit for InMemoryIdentifierAudit {
    async fn record(&self, identifier: &Identifier) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(identifier.id, identifier.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: IdentifierId) -> Result<Option<Identifier>> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.lock().await.len())
    }
}
