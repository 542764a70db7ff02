use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{GroupId, IdentifierId, Profile},
    ports::{RemoteError, RemoteResult, SubjectDirectory},
};

/// Directory that contacts nobody. Every call is logged and fails, so the
/// pipeline can run end-to-end (ticks, accounting, notifications) before a
/// real remote adapter is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunDirectory;

#[async_trait]
impl SubjectDirectory for DryRunDirectory {
    async fn lookup_profile(&self, id: IdentifierId) -> RemoteResult<Profile> {
        tracing::debug!(%id, "dry-run: lookup_profile");
        Err(RemoteError::NotFound)
    }

    async fn send_probe(&self, id: IdentifierId) -> RemoteResult<()> {
        tracing::debug!(%id, "dry-run: send_probe");
        Err(RemoteError::NotFound)
    }

    async fn add_member(&self, group: GroupId, id: IdentifierId) -> RemoteResult<()> {
        tracing::info!(%group, %id, "dry-run: add_member");
        Err(RemoteError::Other("dry run".to_string()))
    }

    async fn create_invite_link(&self, group: GroupId, expires_in: Duration) -> RemoteResult<String> {
        tracing::info!(%group, expires_secs = expires_in.as_secs(), "dry-run: create_invite_link");
        Err(RemoteError::Other("dry run".to_string()))
    }

    async fn send_invite(&self, id: IdentifierId, _link: &str) -> RemoteResult<()> {
        tracing::info!(%id, "dry-run: send_invite");
        Err(RemoteError::Other("dry run".to_string()))
    }
}
