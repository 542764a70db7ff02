use std::sync::Arc;

use teloxide::Bot;

use roster_core::{
    config::Config,
    domain::GroupId,
    dry_run::DryRunDirectory,
    pipeline::{Pipeline, PipelineDeps},
    ports::GroupRepository,
    store::{InMemoryGroupRepository, InMemoryIdentifierAudit, JsonFileGroupRepository},
    Error,
};
use roster_telegram::{TelegramAdminCheck, TelegramNotifier};

#[tokio::main]
async fn main() -> Result<(), Error> {
    roster_core::logging::init("roster")?;

    let cfg = Config::load()?;
    let token = cfg
        .telegram_bot_token
        .clone()
        .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string()))?;
    let admin_chat = cfg
        .admin_chat_id
        .ok_or_else(|| Error::Config("ROSTER_ADMIN_CHAT_ID environment variable is required".to_string()))?;

    let groups: Arc<dyn GroupRepository> = match &cfg.groups_file {
        Some(path) => Arc::new(JsonFileGroupRepository::open(path)?),
        None => Arc::new(InMemoryGroupRepository::new()),
    };

    let seed_groups = cfg.seed_group_ids.clone();
    let bot = Bot::new(token);
    let pipeline = Pipeline::new(
        cfg,
        PipelineDeps {
            directory: Arc::new(DryRunDirectory),
            admin: Arc::new(TelegramAdminCheck::new(bot.clone())),
            notifier: Arc::new(TelegramNotifier::new(bot, admin_chat)),
            groups,
            audit: Arc::new(InMemoryIdentifierAudit::new()),
        },
    )?;

    for id in seed_groups {
        pipeline
            .register_group(GroupId(id), &format!("group {id}"), None)
            .await?;
    }

    // Groups come from ROSTER_GROUP_IDS or GROUPS_FILE; with neither there is nothing to serve.
    pipeline.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    pipeline.stop();

    let stats = pipeline.stats().await?;
    tracing::info!(
        total_added = stats.total_added,
        groups = stats.total_groups,
        pool = stats.pool_size,
        "final stats"
    );
    Ok(())
}
