use async_trait::async_trait;
use serde::Serialize;

use crate::{errors::SchedulerFault, ports::NotificationSink, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Generation,
    Distribution,
}

impl SchedulerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Distribution => "distribution",
        }
    }
}

/// Structured summary handed to the notification sink. Counts only;
/// rendering text is the sink's concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Generation {
        generated: usize,
        active: usize,
        inactive: usize,
        enqueued: usize,
    },
    Distribution {
        groups: usize,
        delivered: usize,
        failed: usize,
        evicted: usize,
        /// Lifetime additions across all groups; absent when the registry could not be read.
        #[serde(skip_serializing_if = "Option::is_none")]
        total_added: Option<u64>,
    },
    Degraded {
        scheduler: SchedulerKind,
        fault: SchedulerFault,
    },
}

/// Send without letting a sink failure escape.
pub async fn notify_best_effort(sink: &dyn NotificationSink, notification: &Notification) {
    if let Err(e) = sink.notify(notification).await {
        tracing::warn!(error = %e, "notification sink failed");
    }
}

/// Sink that only writes summaries to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let line = serde_json::to_string(notification)?;
        tracing::info!(summary = %line, "pipeline summary");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let n = Notification::Degraded {
            scheduler: SchedulerKind::Distribution,
            fault: SchedulerFault::RegistryUnavailable,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["event"], "degraded");
        assert_eq!(v["scheduler"], "distribution");
        assert_eq!(v["fault"], "registry_unavailable");
    }

    #[test]
    fn unknown_total_is_left_out() {
        let n = Notification::Distribution {
            groups: 1,
            delivered: 2,
            failed: 0,
            evicted: 0,
            total_added: None,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["delivered"], 2);
        assert!(v.get("total_added").is_none());
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn notify(&self, _n: &Notification) -> Result<()> {
            Err(crate::Error::External("sink down".to_string()))
        }
    }

    #[tokio::test]
    async fn best_effort_swallows_sink_errors() {
        let n = Notification::Generation {
            generated: 1,
            active: 0,
            inactive: 1,
            enqueued: 0,
        };
        notify_best_effort(&FailingSink, &n).await;
    }
}
