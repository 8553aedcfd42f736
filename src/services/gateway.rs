//! Typed reads and writes over the local store.
//!
//! Every write is an upsert and can be repeated with the same input. Group
//! application is the only place notifications originate: transitions are
//! committed first and handed to the [`NotificationDispatcher`] afterwards, so
//! a transition produces at most one dispatch per subscriber.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Store, Subscriber, TitleWrite};
use crate::domain::{CatalogEntry, Group, MediaStatus, RelationEdge, Title, TitleId};
use crate::services::notifier::NotificationDispatcher;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sea_orm::DbErr> for GatewayError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(format!("{err:#}"))
    }
}

/// Outcome of one `apply_group` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupApplied {
    pub events: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Store,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(store: Store, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    pub async fn upsert_title(&self, title: &Title) -> Result<TitleWrite, GatewayError> {
        let write = self.store.upsert_title(title).await?;
        if write.is_accepted() {
            counter!("anipush_titles_upserted_total").increment(1);
        }
        Ok(write)
    }

    pub async fn upsert_edges(&self, edges: &[RelationEdge]) -> Result<usize, GatewayError> {
        Ok(self.store.upsert_edges(edges).await?)
    }

    /// Stores a title and the edges it reports. An accepted record replaces
    /// the title's edge set; a stale one leaves stored edges alone.
    pub async fn store_entry(&self, entry: &CatalogEntry) -> Result<TitleWrite, GatewayError> {
        let write = self.upsert_title(&entry.title).await?;
        if write.is_accepted() {
            let (_, removed) = self
                .store
                .replace_edges(entry.title.id, &entry.relations, entry.title.updated_at)
                .await?;
            if removed > 0 {
                info!(title_id = %entry.title.id, removed, "Dropped relations no longer reported");
            }
        }
        Ok(write)
    }

    /// Commits membership and baselines for `group`, then dispatches the
    /// resulting notifications. Delivery failures are logged and counted; they
    /// do not roll back the committed transition.
    pub async fn apply_group(&self, group: &Group) -> Result<GroupApplied, GatewayError> {
        let applied = self.store.apply_group(group).await?;
        counter!("anipush_groups_applied_total").increment(1);

        if !applied.dissolved.is_empty() {
            info!(
                canonical_id = %group.canonical_id,
                dissolved = ?applied.dissolved,
                "Merged previous groups"
            );
        }

        let mut outcome = GroupApplied {
            events: applied.events.len(),
            ..GroupApplied::default()
        };

        for notification in &applied.events {
            counter!("anipush_notifications_total", "kind" => notification.kind.as_str())
                .increment(1);
            match self.dispatcher.dispatch(notification).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(
                        chat_id = notification.chat_id,
                        kind = notification.kind.as_str(),
                        title_id = %notification.title.id,
                        error = %e,
                        "Notification dispatch failed"
                    );
                }
            }
        }

        Ok(outcome)
    }

    pub async fn find_ungrouped_title(&self, offset: u64) -> Result<Option<TitleId>, GatewayError> {
        Ok(self.store.find_ungrouped_title(offset).await?)
    }

    pub async fn checkpoint(&self) -> Result<Option<i64>, GatewayError> {
        Ok(self.store.scan_checkpoint().await?)
    }

    pub async fn set_checkpoint(&self, checkpoint: i64) -> Result<(), GatewayError> {
        Ok(self.store.set_scan_checkpoint(checkpoint).await?)
    }

    pub async fn watch_set(&self, subscriber_id: i32) -> Result<Vec<TitleId>, GatewayError> {
        Ok(self.store.watched_titles(subscriber_id).await?)
    }

    pub async fn title_in_store(&self, id: TitleId) -> Result<bool, GatewayError> {
        Ok(self.store.title_exists(id).await?)
    }

    pub async fn titles_in_store(&self, ids: &[TitleId]) -> Result<HashSet<TitleId>, GatewayError> {
        Ok(self.store.existing_title_ids(ids).await?)
    }

    pub async fn title(&self, id: TitleId) -> Result<Option<Title>, GatewayError> {
        Ok(self.store.get_title(id).await?)
    }

    pub async fn edges_from(&self, id: TitleId) -> Result<Vec<RelationEdge>, GatewayError> {
        Ok(self.store.edges_from(id).await?)
    }

    pub async fn edges_into(&self, id: TitleId) -> Result<Vec<RelationEdge>, GatewayError> {
        Ok(self.store.edges_into(id).await?)
    }

    pub async fn baseline_status(&self, id: TitleId) -> Result<Option<MediaStatus>, GatewayError> {
        Ok(self.store.baseline_status(id).await?)
    }

    /// Subscribers who hear about `id`: watchers of any member of its group,
    /// or of the title alone while it is ungrouped.
    pub async fn watchers(&self, id: TitleId) -> Result<Vec<Subscriber>, GatewayError> {
        match self.store.group_of(id).await? {
            Some(canonical) => Ok(self.store.group_watchers(canonical).await?),
            None => Ok(self.store.watchers_of(&[id]).await?),
        }
    }
}
