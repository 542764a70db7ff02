use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{Group, GroupId},
    ports::GroupRepository,
    store::memory::upsert_in_order,
    Result,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct GroupsFileData {
    groups: Vec<Group>,
}

/// Durable group repository: the whole set is rewritten as one JSON document
/// on every upsert and loaded once at construction.
#[derive(Debug)]
pub struct JsonFileGroupRepository {
    path: PathBuf,
    groups: Mutex<Vec<Group>>,
}

impl JsonFileGroupRepository {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_groups_file(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            groups: Mutex::new(data.groups),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl GroupRepository for JsonFileGroupRepository {
    async fn find_by_id(&self, id: GroupId) -> Result<Option<Group>> {
        let groups = self.groups.lock().await;
        Ok(groups.iter().find(|g| g.id == id).cloned())
    }

    async fn upsert(&self, group: Group) -> Result<()> {
        let mut groups = self.groups.lock().await;
        let mut next = groups.clone();
        upsert_in_order(&mut next, group);
        save_groups_file(&self.path, &next)?;
        *groups = next;
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

fn load_groups_file(path: &Path) -> Result<Option<GroupsFileData>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: GroupsFileData = serde_json::from_str(&txt)?;
    Ok(Some(data))
}

fn save_groups_file(path: &Path, groups: &[Group]) -> Result<()> {
    let txt = serde_json::to_string_pretty(&GroupsFileDataRef { groups })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, txt)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Serialize)]
struct GroupsFileDataRef<'a> {
    groups: &'a [Group],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("roster-{name}-{}.json", std::process::id()))
    }

    #[tokio::test]
    async fn persists_and_reloads_groups() {
        let path = temp_path("groups-reload");
        let _ = std::fs::remove_file(&path);

        let repo = JsonFileGroupRepository::open(&path).unwrap();
        let mut g = Group::new(GroupId(-100), "alpha", 2, 5).unwrap();
        g.record_added(1);
        repo.upsert(g).await.unwrap();
        repo.upsert(Group::new(GroupId(-200), "beta", 3, 4).unwrap())
            .await
            .unwrap();

        let reopened = JsonFileGroupRepository::open(&path).unwrap();
        let all = reopened.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha");
        assert_eq!(all[0].added_count(), 1);
        assert_eq!(all[1].batch_size(), 4);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_or_empty_file_starts_empty() {
        let path = temp_path("groups-empty");
        std::fs::write(&path, "").unwrap();
        let repo = JsonFileGroupRepository::open(&path).unwrap();
        assert!(repo.list_all().await.unwrap().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unwritable_path_fails_upsert() {
        let repo = JsonFileGroupRepository::open("/nonexistent-dir/roster/groups.json").unwrap();
        let g = Group::new(GroupId(-1), "x", 2, 5).unwrap();
        assert!(repo.upsert(g).await.is_err());
        assert!(repo.list_all().await.unwrap().is_empty());
    }
}
