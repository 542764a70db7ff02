//! Ordered delivery strategies tried per identifier until one succeeds.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    domain::{
        DeliveryFailure, DeliveryOutcome, DeliveryResult, GroupId, IdentifierId, StrategyKind,
    },
    pacing::Pacer,
    ports::{RemoteError, SubjectDirectory},
};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{failure}: {detail}")]
pub struct DeliveryError {
    pub failure: DeliveryFailure,
    pub detail: String,
}

impl From<RemoteError> for DeliveryError {
    fn from(e: RemoteError) -> Self {
        let failure = match e {
            RemoteError::AlreadyMember => DeliveryFailure::AlreadyMember,
            RemoteError::PrivacyRestricted => DeliveryFailure::PrivacyRestricted,
            RemoteError::NotMutualContact => DeliveryFailure::NotMutualContact,
            RemoteError::RateLimited => DeliveryFailure::RateLimited,
            RemoteError::NotFound | RemoteError::Forbidden | RemoteError::Other(_) => {
                DeliveryFailure::Unknown
            }
        };
        Self {
            failure,
            detail: e.to_string(),
        }
    }
}

/// One way of getting an identifier into a group.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(&self, group: GroupId, id: IdentifierId) -> Result<(), DeliveryError>;
}

/// Add the subject to the group directly.
pub struct DirectAdd {
    directory: Arc<dyn SubjectDirectory>,
}

impl DirectAdd {
    pub fn new(directory: Arc<dyn SubjectDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl DeliveryStrategy for DirectAdd {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    async fn attempt(&self, group: GroupId, id: IdentifierId) -> Result<(), DeliveryError> {
        self.directory.add_member(group, id).await?;
        Ok(())
    }
}

/// Issue an expiring invite link for the group and send it to the subject.
pub struct InviteLink {
    directory: Arc<dyn SubjectDirectory>,
    expires_in: Duration,
}

impl InviteLink {
    pub fn new(directory: Arc<dyn SubjectDirectory>, expires_in: Duration) -> Self {
        Self {
            directory,
            expires_in,
        }
    }
}

#[async_trait]
impl DeliveryStrategy for InviteLink {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Invitation
    }

    async fn attempt(&self, group: GroupId, id: IdentifierId) -> Result<(), DeliveryError> {
        let link = self
            .directory
            .create_invite_link(group, self.expires_in)
            .await?;
        self.directory.send_invite(id, &link).await?;
        Ok(())
    }
}

pub struct DeliveryChain {
    strategies: Vec<Arc<dyn DeliveryStrategy>>,
    pacer: Pacer,
}

impl DeliveryChain {
    pub fn new(delay: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            pacer: Pacer::new(delay),
        }
    }

    /// Direct add, then invitation. Further strategies go after these via `push`.
    pub fn standard(directory: Arc<dyn SubjectDirectory>, delay: Duration, invite_expiry: Duration) -> Self {
        Self::new(delay)
            .push(Arc::new(DirectAdd::new(directory.clone())))
            .push(Arc::new(InviteLink::new(directory, invite_expiry)))
    }

    pub fn push(mut self, strategy: Arc<dyn DeliveryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Try each strategy in order. Stops at the first success, or early when a
    /// strategy reports the subject is already a member.
    pub async fn deliver(&self, group: GroupId, id: IdentifierId) -> DeliveryOutcome {
        let mut last = DeliveryError {
            failure: DeliveryFailure::Unknown,
            detail: "no delivery strategies configured".to_string(),
        };

        for strategy in &self.strategies {
            self.pacer.pace().await;
            match strategy.attempt(group, id).await {
                Ok(()) => {
                    return DeliveryOutcome {
                        identifier_id: id,
                        group_id: group,
                        result: DeliveryResult::Delivered {
                            strategy: strategy.kind(),
                        },
                    };
                }
                Err(e) => {
                    tracing::debug!(
                        %group,
                        %id,
                        strategy = strategy.kind().as_str(),
                        error = %e,
                        "delivery strategy failed"
                    );
                    let conclusive = e.failure == DeliveryFailure::AlreadyMember;
                    last = e;
                    if conclusive {
                        break;
                    }
                }
            }
        }

        DeliveryOutcome {
            identifier_id: id,
            group_id: group,
            result: DeliveryResult::Exhausted {
                failure: last.failure,
                detail: last.detail,
            },
        }
    }
}
