//! Liveness verification for candidate identifiers.
//!
//! Three tiers, each tried only if the previous one failed:
//! 1. profile lookup
//! 2. probe message (optional, disabled unless configured)
//! 3. shape check on the id, used to classify the failure
//!
//! No tier is retried within one `verify` call.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{Identifier, IdentifierId, IdentifierStatus, Profile, Source, VerificationFailure},
    pacing::Pacer,
    ports::{IdentifierAudit, RemoteError, SubjectDirectory},
};

#[derive(Clone, Copy, Debug)]
pub struct VerifierConfig {
    pub probe_enabled: bool,
    pub min_digits: usize,
    pub max_digits: usize,
    /// Spacing between remote calls.
    pub delay: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    pub id: IdentifierId,
    pub active: bool,
    pub reason: Option<VerificationFailure>,
    pub profile: Option<Profile>,
}

impl Verification {
    fn active(id: IdentifierId, profile: Option<Profile>) -> Self {
        Self {
            id,
            active: true,
            reason: None,
            profile,
        }
    }

    fn inactive(id: IdentifierId, reason: VerificationFailure) -> Self {
        Self {
            id,
            active: false,
            reason: Some(reason),
            profile: None,
        }
    }

    /// Identifier record reflecting this verification.
    pub fn to_identifier(&self, source: Source) -> Identifier {
        Identifier {
            id: self.id,
            status: if self.active {
                IdentifierStatus::Active
            } else {
                IdentifierStatus::Inactive
            },
            source,
            checked_at: Some(Utc::now()),
            failure_reason: self.reason.map(Into::into),
            consecutive_failures: 0,
            profile: self.profile.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkVerification {
    pub active_count: usize,
    pub inactive_count: usize,
    pub results: Vec<Verification>,
}

impl BulkVerification {
    pub fn active(&self) -> impl Iterator<Item = &Verification> {
        self.results.iter().filter(|v| v.active)
    }
}

pub struct ActivityVerifier {
    directory: Arc<dyn SubjectDirectory>,
    audit: Arc<dyn IdentifierAudit>,
    cfg: VerifierConfig,
    pacer: Pacer,
}

impl ActivityVerifier {
    pub fn new(
        directory: Arc<dyn SubjectDirectory>,
        audit: Arc<dyn IdentifierAudit>,
        cfg: VerifierConfig,
    ) -> Self {
        Self {
            directory,
            audit,
            pacer: Pacer::new(cfg.delay),
            cfg,
        }
    }

    pub async fn verify(&self, id: IdentifierId) -> Verification {
        self.pacer.pace().await;
        let mut last_err = match self.directory.lookup_profile(id).await {
            Ok(profile) => return Verification::active(id, Some(profile)),
            Err(e) => e,
        };
        tracing::debug!(%id, error = %last_err, "profile lookup failed");

        if self.cfg.probe_enabled {
            self.pacer.pace().await;
            match self.directory.send_probe(id).await {
                Ok(()) => return Verification::active(id, None),
                Err(e) => {
                    tracing::debug!(%id, error = %e, "probe failed");
                    last_err = e;
                }
            }
        }

        Verification::inactive(id, self.classify(id, &last_err))
    }

    pub async fn bulk_verify(&self, ids: Vec<IdentifierId>) -> BulkVerification {
        self.bulk_verify_until(ids, &CancellationToken::new()).await
    }

    /// Like `bulk_verify`, but stops before the next id once `stop` is cancelled.
    pub async fn bulk_verify_until(
        &self,
        ids: Vec<IdentifierId>,
        stop: &CancellationToken,
    ) -> BulkVerification {
        let mut out = BulkVerification::default();
        for id in ids {
            if stop.is_cancelled() {
                tracing::info!("verification stopped early");
                break;
            }

            let verification = self.verify(id).await;
            if verification.active {
                out.active_count += 1;
            } else {
                out.inactive_count += 1;
            }

            let record = verification.to_identifier(Source::Generated);
            if let Err(e) = self.audit.record(&record).await {
                tracing::warn!(%id, error = %e, "failed to record generation audit entry");
            }
            out.results.push(verification);
        }
        out
    }

    fn classify(&self, id: IdentifierId, last_err: &RemoteError) -> VerificationFailure {
        let digits = id.0.is_positive().then(|| id.digit_count());
        match digits {
            Some(d) if d >= self.cfg.min_digits && d <= self.cfg.max_digits => {}
            _ => return VerificationFailure::InvalidLength,
        }
        match last_err {
            RemoteError::PrivacyRestricted => VerificationFailure::PrivacyRestricted,
            RemoteError::NotMutualContact => VerificationFailure::NotMutualContact,
            RemoteError::RateLimited | RemoteError::Other(_) => VerificationFailure::CheckError,
            RemoteError::NotFound | RemoteError::AlreadyMember | RemoteError::Forbidden => {
                VerificationFailure::NotFound
            }
        }
    }
}
