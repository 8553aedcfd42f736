#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anipush::clients::{AttemptFailure, CatalogError, CatalogSource, MediaPage};
use anipush::db::Store;
use anipush::domain::events::Notification;
use anipush::domain::{
    CatalogEntry, MediaFormat, MediaStatus, RelationEdge, RelationKind, Title, TitleId,
};
use anipush::services::{NotificationDispatcher, PersistenceGateway};
use tokio::sync::Notify;

pub const Y2019: i64 = 1_546_300_800;
pub const Y2020: i64 = 1_577_836_800;
pub const Y2021: i64 = 1_609_459_200;

pub async fn spawn_store() -> Store {
    let db_path =
        std::env::temp_dir().join(format!("anipush-test-{}.db", uuid::Uuid::new_v4()));
    Store::new(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("failed to open store")
}

pub fn title(id: i32, status: MediaStatus, start_at: i64, updated_at: i64) -> Title {
    Title {
        id: TitleId::new(id),
        name: format!("Title {id}"),
        format: MediaFormat::Tv,
        status,
        episodes: Some(12),
        latest_aired_episode: None,
        cover_url: None,
        start_at,
        updated_at,
    }
}

/// A TV entry whose edges are all observed at `title.updated_at`.
pub fn entry(title: Title, edges: &[(i32, RelationKind)]) -> CatalogEntry {
    let relations = edges
        .iter()
        .map(|(target, kind)| RelationEdge {
            source: title.id,
            target: TitleId::new(*target),
            kind: *kind,
            target_format: MediaFormat::Tv,
            discovered_at: title.updated_at,
        })
        .collect();
    CatalogEntry { title, relations }
}

pub fn page(entries: Vec<CatalogEntry>, has_next_page: bool) -> MediaPage {
    MediaPage {
        entries,
        rejected: 0,
        per_page: 50,
        has_next_page,
    }
}

/// Collects notifications instead of delivering them.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn gateway(store: &Store) -> (PersistenceGateway, Arc<RecordingDispatcher>) {
    let recorder = Arc::new(RecordingDispatcher::default());
    let gateway = PersistenceGateway::new(store.clone(), recorder.clone());
    (gateway, recorder)
}

/// Scripted catalog. Pages are served by number; ids not in `by_id` are
/// unknown to it.
#[derive(Default)]
pub struct FakeCatalog {
    pub pages: Mutex<Vec<MediaPage>>,
    pub by_id: Mutex<HashMap<TitleId, CatalogEntry>>,
    pub page_calls: Mutex<HashMap<u32, u32>>,
    pub users: Mutex<HashMap<String, (i64, Vec<TitleId>)>>,
    /// Page number that fails as if its retry budget were spent.
    pub failing_page: Mutex<Option<u32>>,
    /// When set, every page request waits for a permit.
    pub hold: Option<Arc<Notify>>,
}

impl FakeCatalog {
    pub fn with_pages(pages: Vec<MediaPage>) -> Self {
        Self {
            pages: Mutex::new(pages),
            ..Self::default()
        }
    }

    pub fn set_pages(&self, pages: Vec<MediaPage>) {
        *self.pages.lock().unwrap() = pages;
    }

    pub fn add_known(&self, entry: CatalogEntry) {
        self.by_id.lock().unwrap().insert(entry.title.id, entry);
    }

    pub fn calls_for_page(&self, page: u32) -> u32 {
        self.page_calls
            .lock()
            .unwrap()
            .get(&page)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl CatalogSource for FakeCatalog {
    async fn updated_page(&self, number: u32, _per_page: u32) -> Result<MediaPage, CatalogError> {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        *self.page_calls.lock().unwrap().entry(number).or_insert(0) += 1;

        if *self.failing_page.lock().unwrap() == Some(number) {
            return Err(CatalogError::Exhausted {
                request: format!("updated page {number}"),
                attempts: 3,
                last: AttemptFailure::Status(500),
            });
        }

        let pages = self.pages.lock().unwrap();
        Ok(pages
            .get(number as usize - 1)
            .cloned()
            .unwrap_or_else(|| page(Vec::new(), false)))
    }

    async fn media_by_ids(&self, ids: &[TitleId]) -> Result<Vec<CatalogEntry>, CatalogError> {
        if ids.len() > self.batch_size() {
            return Err(CatalogError::BatchTooLarge {
                size: ids.len(),
                max: self.batch_size(),
            });
        }
        let known = self.by_id.lock().unwrap();
        Ok(ids.iter().filter_map(|id| known.get(id).cloned()).collect())
    }

    async fn media_with_relations(
        &self,
        id: TitleId,
    ) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(self.by_id.lock().unwrap().get(&id).cloned())
    }

    async fn user_id(&self, username: &str) -> Result<Option<i64>, CatalogError> {
        Ok(self.users.lock().unwrap().get(username).map(|(id, _)| *id))
    }

    async fn watched_titles(&self, username: &str) -> Result<Vec<TitleId>, CatalogError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(username)
            .map(|(_, titles)| titles.clone())
            .unwrap_or_default())
    }

    fn batch_size(&self) -> usize {
        25
    }
}
