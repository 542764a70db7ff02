use std::sync::Arc;

use crate::{
    domain::{IdentifierId, Source},
    errors::SchedulerFault,
    generator::{IdRange, IdentifierGenerator},
    notify::{notify_best_effort, Notification, SchedulerKind},
    pool::SharedPool,
    ports::NotificationSink,
    scheduler::{minutes, KillSwitch, SkipReason, TickGuard, TickState, Ticker},
    verifier::ActivityVerifier,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub skipped: Option<SkipReason>,
    pub generated: usize,
    pub active: usize,
    pub inactive: usize,
    pub enqueued: usize,
}

pub struct GenerationScheduler {
    generator: IdentifierGenerator,
    verifier: Arc<ActivityVerifier>,
    pool: SharedPool,
    notifier: Arc<dyn NotificationSink>,
    range: IdRange,
    batch_size: usize,
    guard: TickGuard,
    kill: KillSwitch,
    ticker: Ticker,
}

impl GenerationScheduler {
    pub fn new(
        generator: IdentifierGenerator,
        verifier: Arc<ActivityVerifier>,
        pool: SharedPool,
        notifier: Arc<dyn NotificationSink>,
        range: IdRange,
        batch_size: usize,
    ) -> Self {
        Self {
            generator,
            verifier,
            pool,
            notifier,
            range,
            batch_size,
            guard: TickGuard::default(),
            kill: KillSwitch::default(),
            ticker: Ticker::new("generation"),
        }
    }

    pub fn start(self: &Arc<Self>, cadence_minutes: u32) {
        let cancel = self.kill.arm();
        let this = Arc::clone(self);
        self.ticker.start(minutes(cadence_minutes), cancel, move || {
            let this = Arc::clone(&this);
            async move {
                let _ = this.tick().await;
            }
        });
    }

    pub fn stop(&self) {
        self.kill.trip();
        self.ticker.stop();
    }

    pub fn is_started(&self) -> bool {
        self.ticker.is_started()
    }

    pub fn state(&self) -> TickState {
        self.guard.state()
    }

    pub async fn tick(&self) -> Result<GenerationReport, SchedulerFault> {
        match self.run_tick().await {
            Ok(report) => Ok(report),
            Err(fault) => {
                tracing::warn!(%fault, "generation tick aborted");
                notify_best_effort(
                    self.notifier.as_ref(),
                    &Notification::Degraded {
                        scheduler: SchedulerKind::Generation,
                        fault,
                    },
                )
                .await;
                Err(fault)
            }
        }
    }

    async fn run_tick(&self) -> Result<GenerationReport, SchedulerFault> {
        if self.kill.is_tripped() {
            return Ok(GenerationReport {
                skipped: Some(SkipReason::Stopped),
                ..GenerationReport::default()
            });
        }
        let Some(_running) = self.guard.enter() else {
            return Ok(GenerationReport {
                skipped: Some(SkipReason::AlreadyRunning),
                ..GenerationReport::default()
            });
        };

        let candidates: Vec<IdentifierId> =
            self.generator.generate(self.batch_size, self.range).collect();
        tracing::info!(candidates = candidates.len(), "generation tick started");

        let stop = self.kill.current();
        let bulk = self.verifier.bulk_verify_until(candidates, &stop).await;

        let mut enqueued = 0usize;
        {
            let mut pool = self.pool.lock().await?;
            for verification in bulk.active() {
                if pool.enqueue(verification.to_identifier(Source::Generated)) {
                    enqueued += 1;
                }
            }
        }

        let report = GenerationReport {
            skipped: None,
            generated: bulk.results.len(),
            active: bulk.active_count,
            inactive: bulk.inactive_count,
            enqueued,
        };
        tracing::info!(
            generated = report.generated,
            active = report.active,
            enqueued = report.enqueued,
            "generation tick finished"
        );

        notify_best_effort(
            self.notifier.as_ref(),
            &Notification::Generation {
                generated: report.generated,
                active: report.active,
                inactive: report.inactive,
                enqueued: report.enqueued,
            },
        )
        .await;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{GroupId, Profile},
        pool::MemberPool,
        ports::{IdentifierAudit, RemoteError, RemoteResult, SubjectDirectory},
        store::InMemoryIdentifierAudit,
        verifier::VerifierConfig,
        Result,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Even ids look up fine, odd ids are not found.
    struct EvenDirectory;

    #[async_trait]
    impl SubjectDirectory for EvenDirectory {
        async fn lookup_profile(&self, id: IdentifierId) -> RemoteResult<Profile> {
            if id.0 % 2 == 0 {
                Ok(Profile::default())
            } else {
                Err(RemoteError::NotFound)
            }
        }
        async fn send_probe(&self, _id: IdentifierId) -> RemoteResult<()> {
            Err(RemoteError::NotFound)
        }
        async fn add_member(&self, _g: GroupId, _id: IdentifierId) -> RemoteResult<()> {
            Ok(())
        }
        async fn create_invite_link(&self, _g: GroupId, _e: Duration) -> RemoteResult<String> {
            Ok(String::new())
        }
        async fn send_invite(&self, _id: IdentifierId, _l: &str) -> RemoteResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, n: &Notification) -> Result<()> {
            self.events.lock().unwrap().push(n.clone());
            Ok(())
        }
    }

    fn scheduler(batch: usize) -> (Arc<GenerationScheduler>, SharedPool, Arc<RecordingSink>, Arc<InMemoryIdentifierAudit>) {
        let audit = Arc::new(InMemoryIdentifierAudit::new());
        let verifier = Arc::new(ActivityVerifier::new(
            Arc::new(EvenDirectory),
            audit.clone(),
            VerifierConfig {
                probe_enabled: false,
                min_digits: 4,
                max_digits: 4,
                delay: Duration::ZERO,
            },
        ));
        let pool = SharedPool::new(MemberPool::new(3), Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::default());
        let sched = Arc::new(GenerationScheduler::new(
            IdentifierGenerator::new(Vec::new()),
            verifier,
            pool.clone(),
            sink.clone(),
            IdRange::new(1000, 9999).unwrap(),
            batch,
        ));
        (sched, pool, sink, audit)
    }

    #[tokio::test]
    async fn enqueues_only_active_results() {
        let (sched, pool, sink, audit) = scheduler(20);
        let report = sched.tick().await.unwrap();
        assert_eq!(report.generated, 20);
        assert_eq!(report.active + report.inactive, 20);

        let pool = pool.lock().await.unwrap();
        assert_eq!(pool.len(), report.enqueued);
        assert!(pool.ids().iter().all(|id| id.0 % 2 == 0));
        assert!(pool.take_batch(100).iter().all(|i| i.is_active()));
        assert!(audit.len().await.unwrap() <= 20);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Notification::Generation { generated: 20, .. }));
    }

    #[tokio::test]
    async fn stopped_scheduler_skips() {
        let (sched, pool, sink, _) = scheduler(5);
        sched.stop();
        let report = sched.tick().await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Stopped));
        assert!(pool.lock().await.unwrap().is_empty());
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pool_fault_surfaces_degraded_event() {
        let (sched, pool, sink, _) = scheduler(3);
        let held = SharedPool::clone(&pool);
        let _guard = held.lock().await.unwrap();
        // Lock timeout is one second; pause time so the wait resolves instantly.
        tokio::time::pause();
        let err = sched.tick().await.unwrap_err();
        assert_eq!(err, SchedulerFault::PoolUnavailable);
        let events = sink.events.lock().unwrap();
        assert!(matches!(
            events[0],
            Notification::Degraded {
                scheduler: SchedulerKind::Generation,
                fault: SchedulerFault::PoolUnavailable
            }
        ));
    }
}
