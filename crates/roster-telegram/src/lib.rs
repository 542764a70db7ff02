//! Telegram adapter (teloxide).
//!
//! Implements the operator-facing ports of `roster-core`: summary
//! notifications to the admin chat and the bot's own privilege check in a
//! target group.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{ParseMode, UserId},
    RequestError,
};

use tokio::{sync::OnceCell, time::sleep};

use roster_core::{
    domain::GroupId,
    errors::Error,
    notify::Notification,
    ports::{GroupAdminCheck, NotificationSink},
    Result,
};

const MAX_RETRIES: usize = 1;

/// Retry once on Telegram flood control (`RetryAfter`), otherwise return the raw error.
async fn with_retry<T, Fut>(mut op: impl FnMut() -> Fut) -> std::result::Result<T, RequestError>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
    Fut::IntoFuture: Send,
{
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                attempts += 1;
                sleep(d).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn map_err(e: RequestError) -> Error {
    Error::External(format!("telegram error: {e}"))
}

fn tg_chat(id: i64) -> teloxide::types::ChatId {
    teloxide::types::ChatId(id)
}

/// Sends pipeline summaries to the operator's chat.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    admin_chat: i64,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, admin_chat: i64) -> Self {
        Self { bot, admin_chat }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let html = render_notification(notification);
        with_retry(|| {
            self.bot
                .send_message(tg_chat(self.admin_chat), html.clone())
                .parse_mode(ParseMode::Html)
        })
        .await
        .map_err(map_err)?;
        Ok(())
    }
}

/// Checks whether the bot is an owner/administrator of a group.
pub struct TelegramAdminCheck {
    bot: Bot,
    me: OnceCell<UserId>,
}

impl TelegramAdminCheck {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            me: OnceCell::new(),
        }
    }

    async fn my_id(&self) -> Result<UserId> {
        let id = self
            .me
            .get_or_try_init(|| async {
                let me = with_retry(|| self.bot.get_me()).await.map_err(map_err)?;
                Ok::<_, Error>(me.user.id)
            })
            .await?;
        Ok(*id)
    }
}

#[async_trait]
impl GroupAdminCheck for TelegramAdminCheck {
    async fn has_privilege(&self, group: GroupId) -> Result<bool> {
        let me = self.my_id().await?;
        match with_retry(|| self.bot.get_chat_member(tg_chat(group.0), me)).await {
            Ok(member) => Ok(member.kind.is_privileged()),
            // The API refuses to describe chats the bot cannot act in.
            Err(RequestError::Api(e)) => {
                tracing::warn!(%group, error = %e, "chat member lookup refused");
                Ok(false)
            }
            Err(e) => Err(map_err(e)),
        }
    }
}

/// HTML text for a summary.
pub fn render_notification(n: &Notification) -> String {
    match n {
        Notification::Generation {
            generated,
            active,
            inactive,
            enqueued,
        } => format!(
            "🔎 <b>Generation</b>\nChecked: {generated}\nActive: {active}\nInactive: {inactive}\nQueued: {enqueued}"
        ),
        Notification::Distribution {
            groups,
            delivered,
            failed,
            evicted,
            total_added,
        } => {
            let mut text = format!(
                "✅ <b>Distribution</b>\nAdded {delivered} members across {groups} groups\nFailed: {failed} (evicted {evicted})"
            );
            if let Some(total) = total_added {
                text.push_str(&format!("\nTotal: {total}"));
            }
            text
        }
        Notification::Degraded { scheduler, fault } => format!(
            "⚠️ <b>{} tick aborted</b>\n{fault}\nWill retry next tick.",
            scheduler.as_str()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::{errors::SchedulerFault, notify::SchedulerKind};

    #[test]
    fn renders_distribution_summary() {
        let html = render_notification(&Notification::Distribution {
            groups: 2,
            delivered: 5,
            failed: 1,
            evicted: 0,
            total_added: Some(40),
        });
        assert!(html.contains("Added 5 members across 2 groups"));
        assert!(html.contains("Total: 40"));

        let html = render_notification(&Notification::Distribution {
            groups: 1,
            delivered: 1,
            failed: 0,
            evicted: 0,
            total_added: None,
        });
        assert!(!html.contains("Total"));
    }

    #[test]
    fn renders_degraded_event() {
        let html = render_notification(&Notification::Degraded {
            scheduler: SchedulerKind::Distribution,
            fault: SchedulerFault::RegistryUnavailable,
        });
        assert!(html.contains("distribution tick aborted"));
        assert!(html.contains("group registry unavailable"));
    }
}
