//! Notification delivery.
//!
//! The gateway decides *when* a subscriber is told about a title; a
//! [`NotificationDispatcher`] decides *how*. Delivery failures are reported
//! back but never undo the committed transition.

use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clients::TelegramClient;
use crate::domain::Title;
use crate::domain::events::{Notification, NotificationKind};

#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log only. Used when no chat channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        info!(
            event = "notification",
            kind = notification.kind.as_str(),
            chat_id = notification.chat_id,
            title_id = %notification.title.id,
            title = %notification.title.name,
            status = notification.title.status.as_str(),
            "Notification"
        );
        Ok(())
    }
}

/// Sends a cover image with an HTML caption per notification, pausing between
/// messages to stay under the Bot API flood limits.
pub struct TelegramNotifier {
    client: TelegramClient,
    send_delay: Duration,
    /// Serializes sends so the pause applies across concurrent callers.
    gate: Mutex<()>,
}

impl TelegramNotifier {
    #[must_use]
    pub fn new(client: TelegramClient, send_delay: Duration) -> Self {
        Self {
            client,
            send_delay,
            gate: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for TelegramNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        let _guard = self.gate.lock().await;

        let caption = render_caption(notification);
        let result = match &notification.title.cover_url {
            Some(cover) => {
                self.client
                    .send_photo(notification.chat_id, cover, &caption)
                    .await
            }
            None => self.client.send_message(notification.chat_id, &caption).await,
        };

        if let Err(e) = &result {
            warn!(
                chat_id = notification.chat_id,
                title_id = %notification.title.id,
                error = %e,
                "Failed to deliver notification"
            );
        } else {
            counter!("anipush_notifications_delivered_total").increment(1);
        }

        tokio::time::sleep(self.send_delay).await;
        result
    }
}

fn format_date(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map_or_else(|| "-".to_string(), |dt| dt.format("%Y-%m-%d").to_string())
}

/// HTML caption for one notification. Every catalog-provided string is escaped.
#[must_use]
pub fn render_caption(notification: &Notification) -> String {
    let title: &Title = &notification.title;
    let name = html_escape::encode_text(&title.name);
    let format = title.format.label();
    let status = title.status.label();

    let (headline, detail) = match notification.kind {
        NotificationKind::New => (
            "New anime found!",
            format!("Found anime <b>{name}</b> ({format})"),
        ),
        NotificationKind::StatusChange => (
            "Anime status changed!",
            format!("The anime {name} ({format}) has changed status to <b>{status}</b>"),
        ),
        NotificationKind::EpisodeUpdate => {
            let episode = title
                .latest_aired_episode
                .or(title.episodes)
                .map_or_else(|| "?".to_string(), |e| e.to_string());
            (
                "New episode out!",
                format!("The <b>episode {episode}</b> of {name} is out!"),
            )
        }
    };

    let mut caption = format!(
        "<b>🔔 {headline}</b>\n\n{detail}\n\n<b>Title:</b> {name}\n<b>Type:</b> {format}\n<b>Status:</b> {status}\n"
    );

    if let Some(episodes) = title.episodes {
        caption.push_str(&format!("<b>Episodes:</b> {episodes}\n"));
    }
    if let Some(latest) = title.latest_aired_episode {
        caption.push_str(&format!("<b>Latest aired episode:</b> {latest}\n"));
    }
    if title.has_known_start() {
        caption.push_str(&format!(
            "<b>Start date:</b> {}\n",
            format_date(title.start_at)
        ));
    }
    caption.push_str(&format!("<b>Updated at:</b> {}", format_date(title.updated_at)));

    caption
}
