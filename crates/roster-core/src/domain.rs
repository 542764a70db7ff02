use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Numeric subject identifier (a user id on the remote service).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentifierId(pub i64);

impl IdentifierId {
    /// Number of decimal digits, ignoring sign.
    pub fn digit_count(self) -> usize {
        self.0.unsigned_abs().to_string().len()
    }

    /// Most significant decimal digit, ignoring sign.
    pub fn leading_digit(self) -> u8 {
        let s = self.0.unsigned_abs().to_string();
        s.as_bytes()[0] - b'0'
    }
}

impl fmt::Display for IdentifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target group (chat) id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierStatus {
    #[default]
    Unknown,
    Active,
    Inactive,
}

/// How an identifier entered the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Manual,
    Generated,
    Collected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    #[error("not found")]
    NotFound,
    #[error("invalid length")]
    InvalidLength,
    #[error("privacy restricted")]
    PrivacyRestricted,
    #[error("not a mutual contact")]
    NotMutualContact,
    #[error("check error")]
    CheckError,
}

impl VerificationFailure {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::PrivacyRestricted | Self::NotMutualContact | Self::CheckError
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFailure {
    #[error("already a member")]
    AlreadyMember,
    #[error("privacy restricted")]
    PrivacyRestricted,
    #[error("not a mutual contact")]
    NotMutualContact,
    #[error("rate limited")]
    RateLimited,
    #[error("unknown delivery failure")]
    Unknown,
}

impl DeliveryFailure {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::PrivacyRestricted | Self::NotMutualContact | Self::RateLimited | Self::Unknown
        )
    }
}

/// Last failure recorded against an identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    Verification(VerificationFailure),
    Delivery(DeliveryFailure),
}

impl FailureReason {
    pub fn is_transient(self) -> bool {
        match self {
            Self::Verification(v) => v.is_transient(),
            Self::Delivery(d) => d.is_transient(),
        }
    }
}

impl From<VerificationFailure> for FailureReason {
    fn from(v: VerificationFailure) -> Self {
        Self::Verification(v)
    }
}

impl From<DeliveryFailure> for FailureReason {
    fn from(d: DeliveryFailure) -> Self {
        Self::Delivery(d)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verification(v) => write!(f, "verification: {v}"),
            Self::Delivery(d) => write!(f, "delivery: {d}"),
        }
    }
}

/// Public profile returned by a successful lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub id: IdentifierId,
    pub status: IdentifierStatus,
    pub source: Source,
    pub checked_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<FailureReason>,
    pub consecutive_failures: u32,
    pub profile: Option<Profile>,
}

impl Identifier {
    /// New unverified identifier. Ids must be positive.
    pub fn new(id: IdentifierId, source: Source) -> Result<Self> {
        if id.0 <= 0 {
            return Err(Error::InvalidRecord(format!(
                "identifier must be positive, got {id}"
            )));
        }
        Ok(Self {
            id,
            status: IdentifierStatus::Unknown,
            source,
            checked_at: None,
            failure_reason: None,
            consecutive_failures: 0,
            profile: None,
        })
    }

    /// Identifier already known to be active (manual or collected enrollment).
    pub fn active(id: IdentifierId, source: Source) -> Result<Self> {
        let mut ident = Self::new(id, source)?;
        ident.status = IdentifierStatus::Active;
        ident.checked_at = Some(Utc::now());
        Ok(ident)
    }

    pub fn is_active(&self) -> bool {
        self.status == IdentifierStatus::Active
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub username: Option<String>,
    added_count: u64,
    pub is_active: bool,
    cadence_minutes: u32,
    batch_size: u32,
    pub last_distributed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(id: GroupId, name: impl Into<String>, cadence_minutes: u32, batch_size: u32) -> Result<Self> {
        validate_schedule(cadence_minutes, batch_size)?;
        Ok(Self {
            id,
            name: name.into(),
            username: None,
            added_count: 0,
            is_active: true,
            cadence_minutes,
            batch_size,
            last_distributed_at: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn added_count(&self) -> u64 {
        self.added_count
    }

    pub fn cadence_minutes(&self) -> u32 {
        self.cadence_minutes
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Count delivered identifiers. `added_count` only ever grows.
    pub fn record_added(&mut self, count: u64) {
        self.added_count = self.added_count.saturating_add(count);
    }

    pub fn set_schedule(&mut self, cadence_minutes: u32, batch_size: u32) -> Result<()> {
        validate_schedule(cadence_minutes, batch_size)?;
        self.cadence_minutes = cadence_minutes;
        self.batch_size = batch_size;
        Ok(())
    }

    /// Whether the group's own cadence has elapsed since its last distribution.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_distributed_at {
            None => true,
            Some(last) => now - last >= ChronoDuration::minutes(i64::from(self.cadence_minutes)),
        }
    }
}

fn validate_schedule(cadence_minutes: u32, batch_size: u32) -> Result<()> {
    if cadence_minutes < 1 {
        return Err(Error::InvalidRecord("cadence must be at least 1 minute".to_string()));
    }
    if batch_size < 1 {
        return Err(Error::InvalidRecord("batch size must be at least 1".to_string()));
    }
    Ok(())
}

/// Strategy that produced a successful delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Direct,
    Invitation,
    Alternate,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Invitation => "invitation",
            Self::Alternate => "alternate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered { strategy: StrategyKind },
    Exhausted { failure: DeliveryFailure, detail: String },
}

/// Per-attempt result; consumed immediately by the distribution tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub identifier_id: IdentifierId,
    pub group_id: GroupId,
    pub result: DeliveryResult,
}

impl DeliveryOutcome {
    pub fn success(&self) -> bool {
        matches!(self.result, DeliveryResult::Delivered { .. })
    }

    pub fn strategy_used(&self) -> Option<StrategyKind> {
        match self.result {
            DeliveryResult::Delivered { strategy } => Some(strategy),
            DeliveryResult::Exhausted { .. } => None,
        }
    }
}
