use serde::Serialize;

/// Core error type.
///
/// Adapter crates map their specific errors into this type. Only `Config`
/// errors raised during setup are treated as fatal by the binary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("scheduler fault: {0}")]
    Scheduler(#[from] SchedulerFault),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Dependency failure that aborts the current tick only.
///
/// Queue state is left as it was so the next tick resumes normally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerFault {
    #[error("group registry unavailable")]
    RegistryUnavailable,

    #[error("member pool unavailable")]
    PoolUnavailable,
}
