//! Hexagonal ports. Everything outside the pipeline core lives behind these.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{Group, GroupId, Identifier, IdentifierId, Profile},
    notify::Notification,
    Result,
};

/// Error taxonomy of the remote subject service, as seen by the core.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("subject not found")]
    NotFound,
    #[error("subject privacy settings restrict this action")]
    PrivacyRestricted,
    #[error("subject is not a mutual contact")]
    NotMutualContact,
    #[error("subject is already a member")]
    AlreadyMember,
    #[error("rate limited by remote service")]
    RateLimited,
    #[error("insufficient privilege")]
    Forbidden,
    #[error("remote error: {0}")]
    Other(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Opaque remote service used to look up, probe and deliver subjects.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn lookup_profile(&self, id: IdentifierId) -> RemoteResult<Profile>;

    /// Low-visibility liveness probe. May notify the subject.
    async fn send_probe(&self, id: IdentifierId) -> RemoteResult<()>;

    async fn add_member(&self, group: GroupId, id: IdentifierId) -> RemoteResult<()>;

    async fn create_invite_link(&self, group: GroupId, expires_in: Duration) -> RemoteResult<String>;

    async fn send_invite(&self, id: IdentifierId, link: &str) -> RemoteResult<()>;
}

/// Whether the distribution actor holds enough privilege in a group.
#[async_trait]
pub trait GroupAdminCheck: Send + Sync {
    async fn has_privilege(&self, group: GroupId) -> Result<bool>;
}

/// Receiver of structured summaries. Failures never affect pipeline state.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Group persistence. `list_*` return groups in registration order.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn find_by_id(&self, id: GroupId) -> Result<Option<Group>>;
    async fn upsert(&self, group: Group) -> Result<()>;
    async fn list_active(&self) -> Result<Vec<Group>>;
    async fn list_all(&self) -> Result<Vec<Group>>;
}

/// Audit-only record of every identifier the generation path has checked.
/// `record` upserts by id.
#[async_trait]
pub trait IdentifierAudit: Send + Sync {
    async fn record(&self, identifier: &Identifier) -> Result<()>;
    async fn find_by_id(&self, id: IdentifierId) -> Result<Option<Identifier>>;
    async fn len(&self) -> Result<usize>;
}
