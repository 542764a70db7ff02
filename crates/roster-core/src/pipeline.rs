//! Explicit application context: built once at startup, owns every component
//! and exposes the operator controls (start/stop, timer, groups, enrollment, stats).

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use serde::Serialize;

use crate::{
    config::{validate_distribution, Config},
    delivery::DeliveryChain,
    domain::{Group, GroupId, Identifier, IdentifierId, Source},
    errors::Error,
    generator::IdentifierGenerator,
    groups::{GroupRegistry, Registration},
    pool::{MemberPool, SharedPool},
    ports::{GroupAdminCheck, GroupRepository, IdentifierAudit, NotificationSink, SubjectDirectory},
    scheduler::{DistributionScheduler, GenerationScheduler},
    verifier::{ActivityVerifier, VerifierConfig},
    Result,
};

/// External collaborators the pipeline is wired against.
#[derive(Clone)]
pub struct PipelineDeps {
    pub directory: Arc<dyn SubjectDirectory>,
    pub admin: Arc<dyn GroupAdminCheck>,
    pub notifier: Arc<dyn NotificationSink>,
    pub groups: Arc<dyn GroupRepository>,
    pub audit: Arc<dyn IdentifierAudit>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DistributionSettings {
    cadence_minutes: u32,
    batch_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub total_added: u64,
    pub total_groups: usize,
    /// Groups that have received at least one identifier.
    pub active_groups: usize,
    pub is_running: bool,
    pub timer_minutes: u32,
    pub members_per_interval: u32,
    pub pool_size: usize,
    pub audited_identifiers: usize,
    pub uptime_secs: u64,
}

pub struct Pipeline {
    cfg: Config,
    settings: Mutex<DistributionSettings>,
    pool: SharedPool,
    registry: Arc<GroupRegistry>,
    audit: Arc<dyn IdentifierAudit>,
    distribution: Arc<DistributionScheduler>,
    generation: Arc<GenerationScheduler>,
    started_at: Instant,
}

impl Pipeline {
    pub fn new(cfg: Config, deps: PipelineDeps) -> Result<Self> {
        cfg.validate()?;

        let pool = SharedPool::new(MemberPool::new(cfg.retry_threshold), cfg.pool_lock_timeout);
        let registry = Arc::new(GroupRegistry::new(deps.groups));

        let verifier = Arc::new(ActivityVerifier::new(
            deps.directory.clone(),
            deps.audit.clone(),
            VerifierConfig {
                probe_enabled: cfg.probe_enabled,
                min_digits: cfg.min_digits,
                max_digits: cfg.max_digits,
                delay: cfg.verify_delay,
            },
        ));
        let chain = Arc::new(DeliveryChain::standard(
            deps.directory,
            cfg.delivery_delay,
            cfg.invite_link_expiry,
        ));

        let distribution = Arc::new(DistributionScheduler::new(
            pool.clone(),
            registry.clone(),
            chain,
            deps.admin,
            deps.notifier.clone(),
        ));
        let generation = Arc::new(GenerationScheduler::new(
            IdentifierGenerator::new(cfg.leading_digits.clone()),
            verifier,
            pool.clone(),
            deps.notifier,
            cfg.id_range,
            cfg.generation_batch_size as usize,
        ));

        Ok(Self {
            settings: Mutex::new(DistributionSettings {
                cadence_minutes: cfg.distribution_cadence_minutes,
                batch_size: cfg.distribution_batch_size,
            }),
            cfg,
            pool,
            registry,
            audit: deps.audit,
            distribution,
            generation,
            started_at: Instant::now(),
        })
    }

    /// Start both schedulers. Returns `false` when already running.
    pub async fn start(&self) -> Result<bool> {
        if self.is_running() {
            return Ok(false);
        }
        if self.registry.list().await?.is_empty() {
            return Err(Error::Config(
                "no groups registered; register a group before starting".to_string(),
            ));
        }

        let settings = self.settings();
        self.generation.start(self.cfg.generation_cadence_minutes);
        self.distribution.start(settings.cadence_minutes);
        tracing::info!(
            distribution_minutes = settings.cadence_minutes,
            generation_minutes = self.cfg.generation_cadence_minutes,
            "pipeline started"
        );
        Ok(true)
    }

    pub fn stop(&self) {
        self.generation.stop();
        self.distribution.stop();
        tracing::info!("pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.distribution.is_started() || self.generation.is_started()
    }

    /// Change distribution cadence and batch size for every group. Restarts the
    /// distribution timer when it is running.
    pub async fn set_timer(&self, cadence_minutes: u32, batch_size: u32) -> Result<()> {
        validate_distribution(cadence_minutes, batch_size)?;
        self.registry
            .apply_schedule(cadence_minutes, batch_size)
            .await?;
        {
            let mut settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
            *settings = DistributionSettings {
                cadence_minutes,
                batch_size,
            };
        }

        if self.distribution.is_started() {
            self.distribution.stop();
            self.distribution.start(cadence_minutes);
        }
        tracing::info!(cadence_minutes, batch_size, "distribution timer updated");
        Ok(())
    }

    pub async fn register_group(
        &self,
        id: GroupId,
        name: &str,
        username: Option<String>,
    ) -> Result<Registration> {
        let settings = self.settings();
        let name = if name.trim().is_empty() {
            "Unknown Group"
        } else {
            name
        };
        let group = Group::new(id, name, settings.cadence_minutes, settings.batch_size)?
            .with_username(username);
        self.registry.register(group).await
    }

    pub async fn deactivate_group(&self, id: GroupId) -> Result<bool> {
        self.registry.deactivate(id).await
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        self.registry.list().await
    }

    /// Enroll an identifier the operator already vouches for (manual or
    /// collected). Returns whether it was newly queued.
    pub async fn enroll(&self, id: IdentifierId, source: Source) -> Result<bool> {
        let ident = Identifier::active(id, source)?;
        let mut pool = self.pool.lock().await?;
        Ok(pool.enqueue(ident))
    }

    pub async fn stats(&self) -> Result<PipelineStats> {
        let groups = self.registry.list().await?;
        let settings = self.settings();
        let pool_size = self.pool.lock().await?.len();
        Ok(PipelineStats {
            total_added: groups.iter().map(Group::added_count).sum(),
            total_groups: groups.len(),
            active_groups: groups.iter().filter(|g| g.added_count() > 0).count(),
            is_running: self.is_running(),
            timer_minutes: settings.cadence_minutes,
            members_per_interval: settings.batch_size,
            pool_size,
            audited_identifiers: self.audit.len().await?,
            uptime_secs: self.started_at.elapsed().as_secs(),
        })
    }

    pub fn distribution(&self) -> &Arc<DistributionScheduler> {
        &self.distribution
    }

    pub fn generation(&self) -> &Arc<GenerationScheduler> {
        &self.generation
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    fn settings(&self) -> DistributionSettings {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::Profile,
        notify::LogNotifier,
        ports::{RemoteError, RemoteResult},
        store::{InMemoryGroupRepository, InMemoryIdentifierAudit},
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct OpenDirectory;

    #[async_trait]
    impl SubjectDirectory for OpenDirectory {
        async fn lookup_profile(&self, _id: IdentifierId) -> RemoteResult<Profile> {
            Ok(Profile::default())
        }
        async fn send_probe(&self, _id: IdentifierId) -> RemoteResult<()> {
            Err(RemoteError::NotFound)
        }
        async fn add_member(&self, _g: GroupId, _id: IdentifierId) -> RemoteResult<()> {
            Ok(())
        }
        async fn create_invite_link(&self, _g: GroupId, _e: Duration) -> RemoteResult<String> {
            Ok("https://invite.example/x".to_string())
        }
        async fn send_invite(&self, _id: IdentifierId, _l: &str) -> RemoteResult<()> {
            Ok(())
        }
    }

    struct AlwaysAdmin;

    #[async_trait]
    impl GroupAdminCheck for AlwaysAdmin {
        async fn has_privilege(&self, _g: GroupId) -> Result<bool> {
            Ok(true)
        }
    }

    fn pipeline() -> Pipeline {
        let cfg = Config {
            verify_delay: Duration::ZERO,
            delivery_delay: Duration::ZERO,
            ..Config::default()
        };
        Pipeline::new(
            cfg,
            PipelineDeps {
                directory: Arc::new(OpenDirectory),
                admin: Arc::new(AlwaysAdmin),
                notifier: Arc::new(LogNotifier),
                groups: Arc::new(InMemoryGroupRepository::new()),
                audit: Arc::new(InMemoryIdentifierAudit::new()),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn start_requires_a_group() {
        let p = pipeline();
        assert!(matches!(p.start().await, Err(Error::Config(_))));
        assert!(!p.is_running());

        p.register_group(GroupId(-1), "one", None).await.unwrap();
        assert!(p.start().await.unwrap());
        assert!(p.is_running());
        assert!(!p.start().await.unwrap());

        p.stop();
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn register_group_uses_current_timer_and_dedups() {
        let p = pipeline();
        p.set_timer(7, 9).await.unwrap();
        let reg = p.register_group(GroupId(-5), "  ", Some("chan".to_string())).await.unwrap();
        let g = reg.group();
        assert_eq!(g.name, "Unknown Group");
        assert_eq!(g.cadence_minutes(), 7);
        assert_eq!(g.batch_size(), 9);
        assert_eq!(g.username.as_deref(), Some("chan"));

        assert!(matches!(
            p.register_group(GroupId(-5), "again", None).await.unwrap(),
            Registration::AlreadyRegistered(_)
        ));
    }

    #[tokio::test]
    async fn set_timer_validates_bounds() {
        let p = pipeline();
        assert!(p.set_timer(0, 5).await.is_err());
        assert!(p.set_timer(61, 5).await.is_err());
        assert!(p.set_timer(5, 51).await.is_err());
        p.set_timer(3, 4).await.unwrap();
        let stats = p.stats().await.unwrap();
        assert_eq!(stats.timer_minutes, 3);
        assert_eq!(stats.members_per_interval, 4);
    }

    #[tokio::test]
    async fn enroll_then_distribute_updates_stats() {
        let p = pipeline();
        p.register_group(GroupId(-1), "one", None).await.unwrap();
        p.register_group(GroupId(-2), "two", None).await.unwrap();
        assert!(p.enroll(IdentifierId(111111), Source::Manual).await.unwrap());
        assert!(!p.enroll(IdentifierId(111111), Source::Collected).await.unwrap());
        assert!(p.enroll(IdentifierId(222222), Source::Collected).await.unwrap());

        let report = p.distribution().tick().await.unwrap();
        assert_eq!(report.delivered, 2);

        let stats = p.stats().await.unwrap();
        assert_eq!(stats.total_added, 2);
        assert_eq!(stats.total_groups, 2);
        assert_eq!(stats.active_groups, 1);
        assert_eq!(stats.pool_size, 0);
        assert!(!stats.is_running);
    }

    #[tokio::test]
    async fn generation_tick_feeds_the_pool() {
        let p = pipeline();
        let report = p.generation().tick().await.unwrap();
        assert_eq!(report.generated, Config::default().generation_batch_size as usize);
        assert_eq!(report.active, report.generated);
        assert_eq!(p.pool().lock().await.unwrap().len(), report.enqueued);
        assert_eq!(p.stats().await.unwrap().audited_identifiers, report.enqueued);
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = Config {
            retry_threshold: 0,
            ..Config::default()
        };
        let deps = PipelineDeps {
            directory: Arc::new(OpenDirectory),
            admin: Arc::new(AlwaysAdmin),
            notifier: Arc::new(LogNotifier),
            groups: Arc::new(InMemoryGroupRepository::new()),
            audit: Arc::new(InMemoryIdentifierAudit::new()),
        };
        assert!(Pipeline::new(cfg, deps).is_err());
    }
}
