use crate::domain::{Group, RelationEdge, Title, TitleId};
use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::group::AppliedGroup;
pub use repositories::subscriber::Subscriber;
pub use repositories::title::TitleWrite;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.starts_with(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn title_repo(&self) -> repositories::title::TitleRepository {
        repositories::title::TitleRepository::new(self.conn.clone())
    }

    fn relation_repo(&self) -> repositories::relation::RelationRepository {
        repositories::relation::RelationRepository::new(self.conn.clone())
    }

    fn group_repo(&self) -> repositories::group::GroupRepository {
        repositories::group::GroupRepository::new(self.conn.clone())
    }

    fn subscriber_repo(&self) -> repositories::subscriber::SubscriberRepository {
        repositories::subscriber::SubscriberRepository::new(self.conn.clone())
    }

    fn scan_state_repo(&self) -> repositories::scan_state::ScanStateRepository {
        repositories::scan_state::ScanStateRepository::new(self.conn.clone())
    }

    // ========================================================================
    // Titles
    // ========================================================================

    pub async fn upsert_title(&self, title: &Title) -> Result<TitleWrite> {
        self.title_repo().upsert(title).await
    }

    pub async fn get_title(&self, id: TitleId) -> Result<Option<Title>> {
        self.title_repo().get(id).await
    }

    pub async fn get_titles_by_ids(&self, ids: &[TitleId]) -> Result<Vec<Title>> {
        self.title_repo().get_by_ids(ids).await
    }

    pub async fn title_exists(&self, id: TitleId) -> Result<bool> {
        self.title_repo().exists(id).await
    }

    pub async fn existing_title_ids(&self, ids: &[TitleId]) -> Result<HashSet<TitleId>> {
        self.title_repo().existing_ids(ids).await
    }

    pub async fn find_ungrouped_title(&self, offset: u64) -> Result<Option<TitleId>> {
        self.title_repo().find_ungrouped(offset).await
    }

    pub async fn count_ungrouped_titles(&self) -> Result<u64> {
        self.title_repo().count_ungrouped().await
    }

    pub async fn count_titles(&self) -> Result<u64> {
        self.title_repo().count().await
    }

    pub async fn group_of(&self, id: TitleId) -> Result<Option<TitleId>> {
        self.title_repo().group_of(id).await
    }

    pub async fn group_members(&self, canonical_id: TitleId) -> Result<Vec<TitleId>> {
        self.title_repo().members_of(canonical_id).await
    }

    pub async fn baseline_status(&self, id: TitleId) -> Result<Option<crate::domain::MediaStatus>> {
        self.title_repo().baseline_status(id).await
    }

    // ========================================================================
    // Relations and groups
    // ========================================================================

    pub async fn upsert_edges(&self, edges: &[RelationEdge]) -> Result<usize> {
        self.relation_repo().upsert_many(edges).await
    }

    pub async fn replace_edges(
        &self,
        source: TitleId,
        edges: &[RelationEdge],
        observed_at: i64,
    ) -> Result<(usize, u64)> {
        self.relation_repo()
            .replace_for_source(source, edges, observed_at)
            .await
    }

    pub async fn edges_from(&self, source: TitleId) -> Result<Vec<RelationEdge>> {
        self.relation_repo().for_source(source).await
    }

    pub async fn edges_into(&self, target: TitleId) -> Result<Vec<RelationEdge>> {
        self.relation_repo().for_target(target).await
    }

    pub async fn apply_group(&self, group: &Group) -> Result<AppliedGroup> {
        self.group_repo().apply(group).await
    }

    pub async fn count_groups(&self) -> Result<u64> {
        self.group_repo().count().await
    }

    pub async fn group_watchers(&self, canonical_id: TitleId) -> Result<Vec<Subscriber>> {
        self.group_repo().watchers_of_group(canonical_id).await
    }

    // ========================================================================
    // Subscribers
    // ========================================================================

    pub async fn upsert_subscriber(&self, chat_id: i64, anilist_username: &str) -> Result<Subscriber> {
        self.subscriber_repo().upsert(chat_id, anilist_username).await
    }

    pub async fn get_subscriber(&self, chat_id: i64) -> Result<Option<Subscriber>> {
        self.subscriber_repo().get_by_chat(chat_id).await
    }

    pub async fn subscribers_missing_anilist_id(&self) -> Result<Vec<Subscriber>> {
        self.subscriber_repo().list_missing_anilist_id().await
    }

    pub async fn set_subscriber_anilist_id(&self, subscriber_id: i32, anilist_id: i64) -> Result<()> {
        self.subscriber_repo()
            .set_anilist_id(subscriber_id, anilist_id)
            .await
    }

    pub async fn add_watch_records(
        &self,
        subscriber_id: i32,
        titles: &[(TitleId, i32)],
    ) -> Result<u64> {
        self.subscriber_repo()
            .add_watch_records(subscriber_id, titles)
            .await
    }

    pub async fn watched_titles(&self, subscriber_id: i32) -> Result<Vec<TitleId>> {
        self.subscriber_repo().watched_titles(subscriber_id).await
    }

    pub async fn watchers_of(&self, titles: &[TitleId]) -> Result<Vec<Subscriber>> {
        self.subscriber_repo().watchers_of(titles).await
    }

    // ========================================================================
    // Scan state
    // ========================================================================

    pub async fn scan_checkpoint(&self) -> Result<Option<i64>> {
        self.scan_state_repo().checkpoint().await
    }

    pub async fn last_scan_pass_at(&self) -> Result<Option<String>> {
        self.scan_state_repo().last_pass_at().await
    }

    pub async fn set_scan_checkpoint(&self, checkpoint: i64) -> Result<()> {
        self.scan_state_repo().set_checkpoint(checkpoint).await
    }
}
