// src/commands.rs
//! Telegram command surface: long-polls `getUpdates` and answers the
//! text commands carried over from the bot's chat interface. Replies go
//! through the shared dispatcher so command traffic honors the same
//! transport rate ceiling as fan-out cycles.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;

use crate::cache::DigestCache;
use crate::dispatch::Dispatcher;
use crate::fanout::Orchestrator;
use crate::i18n::{phrase, Phrase};
use crate::render::render_message;
use crate::store::PreferenceStore;
use crate::transport::{TelegramApi, TelegramUpdate};
use crate::types::{DeliveryReport, FanoutShape, Language, Recipient, RecipientId, Topic};

pub struct CommandContext {
    pub api: Arc<TelegramApi>,
    pub store: Arc<dyn PreferenceStore>,
    pub cache: Arc<DigestCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Long-polling loop. Poll errors back off and retry; shutdown stops the
/// loop between polls.
pub async fn run_command_loop(ctx: CommandContext, mut shutdown: watch::Receiver<bool>) {
    let mut offset = 0i64;
    tracing::info!("command loop started");
    loop {
        let updates = tokio::select! {
            res = ctx.api.get_updates(offset, 30) => res,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("command loop stopping");
                    return;
                }
                Ok(Vec::new())
            }
        };
        if *shutdown.borrow() {
            tracing::info!("command loop stopping");
            return;
        }
        match updates {
            Ok(batch) => {
                for update in batch {
                    offset = offset.max(update.update_id + 1);
                    if let Err(e) = handle_update(&ctx, &update).await {
                        tracing::warn!(update_id = update.update_id, error = ?e, "command failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = ?e, "getUpdates failed, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

async fn handle_update(ctx: &CommandContext, update: &TelegramUpdate) -> Result<()> {
    let Some(message) = &update.message else {
        return Ok(());
    };
    let Some(text) = &message.text else {
        return Ok(());
    };
    if message.from.as_ref().is_some_and(|u| u.is_bot) {
        return Ok(());
    }
    if !text.starts_with('/') {
        return Ok(());
    }

    let chat_id = message.chat.id;
    let recipient = ctx.store.upsert_recipient(chat_id)?;
    ensure_first_admin(ctx, chat_id)?;

    let mut parts = text.splitn(2, char::is_whitespace);
    let command = parts
        .next()
        .unwrap_or_default()
        .split('@')
        .next()
        .unwrap_or_default();
    let args = parts.next().unwrap_or("").trim();

    match command {
        "/start" | "/help" => cmd_help(ctx, &recipient).await,
        "/news" => cmd_news(ctx, &recipient).await,
        "/subscribe" => cmd_subscribe(ctx, &recipient).await,
        "/unsubscribe" => cmd_unsubscribe(ctx, &recipient).await,
        "/language" => cmd_language(ctx, &recipient, args).await,
        "/topics" => cmd_topics(ctx, &recipient, args).await,
        "/status" => cmd_status(ctx, &recipient).await,
        "/notify" => cmd_notify(ctx, &recipient, args).await,
        "/report" => cmd_report(ctx, &recipient).await,
        "/addadmin" => cmd_addadmin(ctx, &recipient, args).await,
        _ => Ok(()),
    }
}

/// The first recipient ever seen becomes the administrator.
fn ensure_first_admin(ctx: &CommandContext, id: RecipientId) -> Result<()> {
    if ctx.store.admin_count()? == 0 && ctx.store.recipient_count()? == 1 {
        ctx.store.add_admin(id)?;
        tracing::info!(recipient = id, "first recipient promoted to admin");
    }
    Ok(())
}

async fn reply(ctx: &CommandContext, recipient: RecipientId, text: &str) -> Result<()> {
    // Outcome (including deactivation of blocked chats) is handled by
    // the dispatcher; command replies have nothing extra to do with it.
    let _ = ctx.dispatcher.dispatch(recipient, text).await;
    Ok(())
}

async fn cmd_help(ctx: &CommandContext, recipient: &Recipient) -> Result<()> {
    let lang = recipient.language;
    let text = format!(
        "{}\n\n{}",
        phrase(lang, Phrase::Welcome),
        phrase(lang, Phrase::Commands)
    );
    reply(ctx, recipient.id, &text).await
}

/// Personal on-demand digest. Always fetches fresh content, mirroring
/// the manual-trigger cache bypass.
async fn cmd_news(ctx: &CommandContext, recipient: &Recipient) -> Result<()> {
    let lang = recipient.language;
    reply(ctx, recipient.id, phrase(lang, Phrase::FetchingNews)).await?;

    let mut digests = std::collections::BTreeMap::new();
    for request in recipient.digest_requests() {
        match ctx.cache.get_or_fetch(request, true).await {
            Ok(body) => {
                digests.insert(request.topic, body);
            }
            Err(e) => {
                tracing::warn!(recipient = recipient.id, topic = request.topic.as_key(), error = ?e, "news fetch failed");
            }
        }
    }

    match render_message(recipient, &digests, Utc::now()) {
        Some(message) => reply(ctx, recipient.id, &message).await,
        None => reply(ctx, recipient.id, phrase(lang, Phrase::NewsFailed)).await,
    }
}

async fn cmd_subscribe(ctx: &CommandContext, recipient: &Recipient) -> Result<()> {
    let lang = recipient.language;
    if recipient.active {
        return reply(ctx, recipient.id, phrase(lang, Phrase::AlreadySubscribed)).await;
    }
    ctx.store.set_active(recipient.id, true)?;
    reply(ctx, recipient.id, phrase(lang, Phrase::Subscribed)).await
}

async fn cmd_unsubscribe(ctx: &CommandContext, recipient: &Recipient) -> Result<()> {
    let lang = recipient.language;
    if !recipient.active {
        return reply(ctx, recipient.id, phrase(lang, Phrase::NotSubscribed)).await;
    }
    ctx.store.set_active(recipient.id, false)?;
    reply(ctx, recipient.id, phrase(lang, Phrase::Unsubscribed)).await
}

async fn cmd_language(ctx: &CommandContext, recipient: &Recipient, args: &str) -> Result<()> {
    let lang = recipient.language;
    let Some(new_lang) = Language::parse(args) else {
        return reply(ctx, recipient.id, phrase(lang, Phrase::LanguageUsage)).await;
    };
    ctx.store
        .update_preferences(recipient.id, Some(new_lang), None)?;
    // Confirm in the language just chosen.
    reply(
        ctx,
        recipient.id,
        phrase(new_lang, Phrase::LanguageChanged),
    )
    .await
}

async fn cmd_topics(ctx: &CommandContext, recipient: &Recipient, args: &str) -> Result<()> {
    let lang = recipient.language;
    if args.is_empty() {
        let current = recipient
            .topics
            .iter()
            .map(|t| t.label(lang))
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!("{}\n\n{}", phrase(lang, Phrase::TopicsUsage), current);
        return reply(ctx, recipient.id, &text).await;
    }

    let mut topics = BTreeSet::new();
    for key in args.split(',') {
        let Some(topic) = Topic::parse(key) else {
            let text = format!("{} ({})", phrase(lang, Phrase::UnknownTopic), key.trim());
            return reply(ctx, recipient.id, &text).await;
        };
        topics.insert(topic);
    }
    ctx.store
        .update_preferences(recipient.id, None, Some(topics.clone()))?;

    let chosen = topics
        .iter()
        .map(|t| t.label(lang))
        .collect::<Vec<_>>()
        .join(", ");
    let text = format!("{}\n{}", phrase(lang, Phrase::TopicsUpdated), chosen);
    reply(ctx, recipient.id, &text).await
}

async fn cmd_status(ctx: &CommandContext, recipient: &Recipient) -> Result<()> {
    let lang = recipient.language;
    let topics = recipient
        .topics
        .iter()
        .map(|t| t.label(lang))
        .collect::<Vec<_>>()
        .join(", ");
    let text = format!(
        "*{}*\n\n{}: {}\n{}: {}\n{}: {}\n{}: {}",
        phrase(lang, Phrase::StatusHeader),
        label(lang, "Language", "Язык"),
        lang.display_name(),
        label(lang, "Topics", "Темы"),
        topics,
        label(lang, "Subscribed", "Подписка"),
        if recipient.active { "yes" } else { "no" },
        label(lang, "Active subscribers", "Активных подписчиков"),
        ctx.store.active_count()?,
    );
    reply(ctx, recipient.id, &text).await
}

/// Admin: manual fan-out, optionally narrowed to one topic. Bypasses the
/// digest cache and replies with the cycle's delivery report.
async fn cmd_notify(ctx: &CommandContext, recipient: &Recipient, args: &str) -> Result<()> {
    let lang = recipient.language;
    if !ctx.store.is_admin(recipient.id)? {
        return reply(ctx, recipient.id, phrase(lang, Phrase::AdminOnly)).await;
    }
    let shape = if args.is_empty() {
        FanoutShape::AllActive
    } else {
        match FanoutShape::parse(args) {
            Some(s) => s,
            None => return reply(ctx, recipient.id, phrase(lang, Phrase::UnknownTopic)).await,
        }
    };

    match ctx.orchestrator.trigger_manual(shape).await {
        Ok(report) => {
            let text = format_report(lang, &report);
            reply(ctx, recipient.id, &text).await
        }
        Err(e) => {
            tracing::error!(error = ?e, "manual fan-out failed");
            reply(ctx, recipient.id, phrase(lang, Phrase::ManualFanoutFailed)).await
        }
    }
}

async fn cmd_report(ctx: &CommandContext, recipient: &Recipient) -> Result<()> {
    let lang = recipient.language;
    if !ctx.store.is_admin(recipient.id)? {
        return reply(ctx, recipient.id, phrase(lang, Phrase::AdminOnly)).await;
    }
    match ctx.orchestrator.last_report() {
        Some(report) => {
            let text = format_report(lang, &report);
            reply(ctx, recipient.id, &text).await
        }
        None => reply(ctx, recipient.id, phrase(lang, Phrase::NoReportYet)).await,
    }
}

async fn cmd_addadmin(ctx: &CommandContext, recipient: &Recipient, args: &str) -> Result<()> {
    let lang = recipient.language;
    if !ctx.store.is_admin(recipient.id)? {
        return reply(ctx, recipient.id, phrase(lang, Phrase::AdminOnly)).await;
    }
    match args.parse::<i64>() {
        Ok(new_admin) => {
            ctx.store.add_admin(new_admin)?;
            tracing::info!(new_admin, by = recipient.id, "admin added");
            reply(ctx, recipient.id, "OK").await
        }
        Err(_) => reply(ctx, recipient.id, "Usage: /addadmin <user_id>").await,
    }
}

fn label(lang: Language, en: &'static str, ru: &'static str) -> &'static str {
    match lang {
        Language::En => en,
        Language::Ru => ru,
    }
}

pub fn format_report(lang: Language, report: &DeliveryReport) -> String {
    let mut out = format!(
        "*{}* ({})\n{}: {}\n{}: {}\n{}: {}\n{}: {}\n{}: {}",
        phrase(lang, Phrase::ReportHeader),
        report.shape,
        label(lang, "Attempted", "Попыток"),
        report.attempted,
        label(lang, "Delivered", "Доставлено"),
        report.delivered,
        label(lang, "Unreachable", "Недоступно"),
        report.unreachable,
        label(lang, "Deferred", "Отложено"),
        report.transient,
        label(lang, "Skipped", "Пропущено"),
        report.skipped,
    );
    if !report.failed_topics.is_empty() {
        let failed = report
            .failed_topics
            .iter()
            .map(|t| t.as_key())
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "\n{}: {}",
            label(lang, "Failed topics", "Темы с ошибками"),
            failed
        ));
    }
    out.push_str(&format!("\n{} ms", report.duration_ms));
    out
}
