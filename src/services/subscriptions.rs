use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clients::CatalogSource;
use crate::db::Subscriber;
use crate::domain::TitleId;
use crate::services::gateway::PersistenceGateway;

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    pub subscribers: usize,
    pub imported: usize,
    pub skipped: usize,
    pub watch_records: u64,
    pub titles_fetched: usize,
}

/// Imports watched lists for subscribers whose catalog account is not
/// resolved yet.
pub struct SubscriptionService {
    catalog: Arc<dyn CatalogSource>,
    gateway: PersistenceGateway,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogSource>, gateway: PersistenceGateway) -> Self {
        Self { catalog, gateway }
    }

    pub async fn register(&self, chat_id: i64, anilist_username: &str) -> Result<Subscriber> {
        let username = anilist_username.trim();
        if username.is_empty() {
            anyhow::bail!("AniList username must not be empty");
        }
        self.gateway.store().upsert_subscriber(chat_id, username).await
    }

    pub async fn sync_pending(&self) -> Result<SyncReport> {
        let pending = self.gateway.store().subscribers_missing_anilist_id().await?;
        let mut report = SyncReport {
            subscribers: pending.len(),
            ..SyncReport::default()
        };

        for subscriber in pending {
            match self.import(&subscriber, &mut report).await {
                Ok(true) => report.imported += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.skipped += 1;
                    error!(
                        chat_id = subscriber.chat_id,
                        username = %subscriber.anilist_username,
                        error = %e,
                        "Failed to import watched list"
                    );
                }
            }
        }

        info!(
            subscribers = report.subscribers,
            imported = report.imported,
            skipped = report.skipped,
            watch_records = report.watch_records,
            "Subscriber sync finished"
        );
        Ok(report)
    }

    async fn import(&self, subscriber: &Subscriber, report: &mut SyncReport) -> Result<bool> {
        let username = subscriber.anilist_username.as_str();

        let Some(anilist_id) = self.catalog.user_id(username).await? else {
            warn!(username, "Could not find AniList account");
            return Ok(false);
        };

        let watched = self.catalog.watched_titles(username).await?;
        if watched.is_empty() {
            warn!(username, "No watched titles found");
            return Ok(false);
        }

        let known = self.gateway.titles_in_store(&watched).await?;
        let unknown: Vec<TitleId> = watched
            .iter()
            .copied()
            .filter(|id| !known.contains(id))
            .collect();

        for chunk in unknown.chunks(self.catalog.batch_size().max(1)) {
            for entry in self.catalog.media_by_ids(chunk).await? {
                self.gateway.store_entry(&entry).await?;
                report.titles_fetched += 1;
            }
        }

        // Start each pair at the current episode so the backlog is not announced.
        let latest: HashMap<TitleId, i32> = self
            .gateway
            .store()
            .get_titles_by_ids(&watched)
            .await?
            .into_iter()
            .map(|t| (t.id, t.latest_aired_episode.unwrap_or(0)))
            .collect();
        let pairs: Vec<(TitleId, i32)> = watched
            .iter()
            .map(|id| (*id, latest.get(id).copied().unwrap_or(0)))
            .collect();

        report.watch_records += self
            .gateway
            .store()
            .add_watch_records(subscriber.id, &pairs)
            .await?;
        self.gateway
            .store()
            .set_subscriber_anilist_id(subscriber.id, anilist_id)
            .await?;

        info!(
            username,
            anilist_id,
            watched = watched.len(),
            "Imported watched list"
        );
        Ok(true)
    }
}
