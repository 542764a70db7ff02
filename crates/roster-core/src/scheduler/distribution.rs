use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::{
    delivery::DeliveryChain,
    domain::{DeliveryResult, Group, GroupId},
    errors::SchedulerFault,
    groups::GroupRegistry,
    notify::{notify_best_effort, Notification, SchedulerKind},
    pool::{FailureDisposition, SharedPool},
    ports::{GroupAdminCheck, NotificationSink},
    scheduler::{minutes, KillSwitch, SkipReason, TickClock, TickGuard, TickState, Ticker},
};

/// Timer jitter tolerated when deciding whether a group's cadence has elapsed.
const DUE_SLACK_SECS: i64 = 5;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub skipped: Option<SkipReason>,
    pub groups_served: usize,
    pub delivered: usize,
    pub failed: usize,
    pub evicted: usize,
    pub deactivated: usize,
    /// Set when a stop request cut the tick short.
    pub interrupted: bool,
}

impl DistributionReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

pub struct DistributionScheduler {
    pool: SharedPool,
    registry: Arc<GroupRegistry>,
    chain: Arc<DeliveryChain>,
    admin: Arc<dyn GroupAdminCheck>,
    notifier: Arc<dyn NotificationSink>,
    guard: TickGuard,
    kill: KillSwitch,
    ticker: Ticker,
    clock: TickClock,
    /// Deliveries already committed to the pool but not yet persisted on the group.
    unsaved: Mutex<HashMap<GroupId, u64>>,
}

impl DistributionScheduler {
    pub fn new(
        pool: SharedPool,
        registry: Arc<GroupRegistry>,
        chain: Arc<DeliveryChain>,
        admin: Arc<dyn GroupAdminCheck>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            pool,
            registry,
            chain,
            admin,
            notifier,
            guard: TickGuard::default(),
            kill: KillSwitch::default(),
            ticker: Ticker::new("distribution"),
            clock: TickClock::new(),
            unsaved: Mutex::new(HashMap::new()),
        }
    }

    pub fn start(self: &Arc<Self>, cadence_minutes: u32) {
        let cancel = self.kill.arm();
        let this = Arc::clone(self);
        self.ticker.start(minutes(cadence_minutes), cancel, move || {
            let this = Arc::clone(&this);
            async move {
                // Faults are already logged and surfaced as degraded events.
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

    /// Run one distribution tick.
    pub async fn tick(&self) -> Result<DistributionReport, SchedulerFault> {
        match self.run_tick().await {
            Ok(report) => Ok(report),
            Err(fault) => {
                tracing::warn!(%fault, "distribution tick aborted");
                notify_best_effort(
                    self.notifier.as_ref(),
                    &Notification::Degraded {
                        scheduler: SchedulerKind::Distribution,
                        fault,
                    },
                )
                .await;
                Err(fault)
            }
        }
    }

    async fn run_tick(&self) -> Result<DistributionReport, SchedulerFault> {
        if self.kill.is_tripped() {
            return Ok(DistributionReport::skipped(SkipReason::Stopped));
        }
        let Some(_running) = self.guard.enter() else {
            tracing::debug!("distribution tick already running, skipping");
            return Ok(DistributionReport::skipped(SkipReason::AlreadyRunning));
        };

        self.flush_unsaved().await?;

        let groups = self.registry.active_groups().await?;
        if groups.is_empty() {
            return Ok(DistributionReport::skipped(SkipReason::NoActiveGroups));
        }
        if self.pool.lock().await?.is_empty() {
            return Ok(DistributionReport::skipped(SkipReason::EmptyPool));
        }

        // One timestamp per tick: it decides who is due and stamps who was served.
        let now = self.clock.now();
        let due_by = now + ChronoDuration::seconds(DUE_SLACK_SECS);
        let mut report = DistributionReport::default();
        tracing::info!(groups = groups.len(), "distribution tick started");

        for group in groups {
            if self.kill.is_tripped() {
                report.interrupted = true;
                break;
            }
            if !group.is_due(due_by) {
                continue;
            }

            match self.admin.has_privilege(group.id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(group = %group.id, "insufficient privilege, deactivating group");
                    self.registry.deactivate(group.id).await.map_err(|e| {
                        tracing::warn!(group = %group.id, error = %e, "group repository failed to deactivate group");
                        SchedulerFault::RegistryUnavailable
                    })?;
                    report.deactivated += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(group = %group.id, error = %e, "admin check failed, skipping group this tick");
                    continue;
                }
            }

            let delivered = self.distribute_to(&group, &mut report).await;
            self.persist(group.id, Some(now)).await?;
            delivered?;
            report.groups_served += 1;

            if report.interrupted {
                break;
            }
        }

        tracing::info!(
            served = report.groups_served,
            delivered = report.delivered,
            failed = report.failed,
            evicted = report.evicted,
            "distribution tick finished"
        );

        if report.delivered > 0 {
            let total_added = match self.registry.list().await {
                Ok(all) => Some(all.iter().map(Group::added_count).sum()),
                Err(e) => {
                    tracing::warn!(error = %e, "group repository unreadable, summary sent without total");
                    None
                }
            };
            notify_best_effort(
                self.notifier.as_ref(),
                &Notification::Distribution {
                    groups: report.groups_served,
                    delivered: report.delivered,
                    failed: report.failed,
                    evicted: report.evicted,
                    total_added,
                },
            )
            .await;
        }

        Ok(report)
    }

    /// Deliver one batch into `group`. Each success is counted in `unsaved`
    /// as soon as the pool commits it, so a later fault cannot lose it.
    async fn distribute_to(
        &self,
        group: &Group,
        report: &mut DistributionReport,
    ) -> Result<(), SchedulerFault> {
        let batch = self.pool.lock().await?.take_batch(group.batch_size() as usize);

        for ident in batch {
            // Checkpoint after every identifier, not only at tick start.
            if self.kill.is_tripped() {
                report.interrupted = true;
                break;
            }

            let outcome = self.chain.deliver(group.id, ident.id).await;
            let mut pool = self.pool.lock().await?;
            match outcome.result {
                DeliveryResult::Delivered { strategy } => {
                    pool.commit_success(ident.id);
                    *self.unsaved().entry(group.id).or_default() += 1;
                    report.delivered += 1;
                    tracing::debug!(group = %group.id, id = %ident.id, strategy = strategy.as_str(), "delivered");
                }
                DeliveryResult::Exhausted { failure, detail } => {
                    report.failed += 1;
                    match pool.commit_failure(ident.id, failure.into()) {
                        FailureDisposition::Evicted {
                            consecutive_failures,
                        } => {
                            report.evicted += 1;
                            tracing::info!(
                                id = %ident.id,
                                reason = %failure,
                                consecutive_failures,
                                "identifier evicted"
                            );
                        }
                        FailureDisposition::Requeued {
                            consecutive_failures,
                        } => {
                            tracing::debug!(id = %ident.id, reason = %failure, %detail, consecutive_failures, "identifier requeued");
                        }
                        FailureDisposition::NotPresent => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Write the group's pending additions (and the tick stamp, if any) to
    /// the registry. On failure the additions stay pending for the next tick.
    async fn persist(
        &self,
        id: GroupId,
        distributed_at: Option<DateTime<Utc>>,
    ) -> Result<(), SchedulerFault> {
        let added = self.unsaved().remove(&id).unwrap_or(0);
        if added == 0 && distributed_at.is_none() {
            return Ok(());
        }
        if let Err(fault) = self.registry.record_distribution(id, added, distributed_at).await {
            if added > 0 {
                *self.unsaved().entry(id).or_default() += added;
            }
            return Err(fault);
        }
        Ok(())
    }

    async fn flush_unsaved(&self) -> Result<(), SchedulerFault> {
        let pending: Vec<GroupId> = self.unsaved().keys().copied().collect();
        for id in pending {
            tracing::info!(group = %id, "persisting additions left over from an aborted tick");
            self.persist(id, None).await?;
        }
        Ok(())
    }

    fn unsaved(&self) -> MutexGuard<'_, HashMap<GroupId, u64>> {
        self.unsaved.lock().unwrap_or_else(|e| e.into_inner())
    }
}
