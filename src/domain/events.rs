//! Domain events for the application.
//!
//! A [`Notification`] is produced by the persistence gateway whenever a
//! grouped title undergoes a transition worth telling a subscriber about.
//! Delivery is handled by a [`crate::services::NotificationDispatcher`].

use serde::Serialize;

use super::{MediaStatus, Title};

/// Kind of transition being announced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A title was grouped for the first time.
    New,
    StatusChange,
    EpisodeUpdate,
}

impl NotificationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::StatusChange => "status_change",
            Self::EpisodeUpdate => "episode_update",
        }
    }
}

/// One delivery request for one subscriber.
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    /// Chat id of the subscriber on the delivery channel.
    pub chat_id: i64,
    pub kind: NotificationKind,
    pub title: Title,
}

/// Classifies a member's status against the baseline recorded when its group
/// was last applied. `None` baseline means the title was never grouped.
#[must_use]
pub fn status_transition(
    baseline: Option<MediaStatus>,
    current: MediaStatus,
) -> Option<NotificationKind> {
    match baseline {
        None => Some(NotificationKind::New),
        Some(previous) if previous != current => Some(NotificationKind::StatusChange),
        Some(_) => None,
    }
}

/// Whether a watcher who last heard about `notified` should hear about `latest`.
#[must_use]
pub fn has_new_episode(notified: i32, latest: Option<i32>) -> bool {
    latest.is_some_and(|latest| latest > notified)
}
