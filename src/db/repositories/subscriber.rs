use crate::domain::TitleId;
use crate::entities::{prelude::*, subscribers, watch_records};
use anyhow::Result;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, JoinType, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, Set,
};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub id: i32,
    pub chat_id: i64,
    pub anilist_username: String,
    pub anilist_id: Option<i64>,
    pub created_at: String,
}

pub struct SubscriberRepository {
    conn: DatabaseConnection,
}

impl SubscriberRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub(crate) fn map_model(model: subscribers::Model) -> Subscriber {
        Subscriber {
            id: model.id,
            chat_id: model.chat_id,
            anilist_username: model.anilist_username,
            anilist_id: model.anilist_id,
            created_at: model.created_at,
        }
    }

    /// Registers a chat, or points an existing one at a new username. A changed
    /// username forgets the resolved account id so the watched list is re-imported.
    pub async fn upsert(&self, chat_id: i64, anilist_username: &str) -> Result<Subscriber> {
        let active_model = subscribers::ActiveModel {
            chat_id: Set(chat_id),
            anilist_username: Set(anilist_username.to_string()),
            anilist_id: Set(None),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };

        let existing = Subscribers::find()
            .filter(subscribers::Column::ChatId.eq(chat_id))
            .one(&self.conn)
            .await?;

        match existing {
            Some(row) if row.anilist_username == anilist_username => {
                return Ok(Self::map_model(row));
            }
            Some(row) => {
                Subscribers::update_many()
                    .col_expr(
                        subscribers::Column::AnilistUsername,
                        sea_orm::sea_query::Expr::value(anilist_username),
                    )
                    .col_expr(
                        subscribers::Column::AnilistId,
                        sea_orm::sea_query::Expr::value(Option::<i64>::None),
                    )
                    .filter(subscribers::Column::Id.eq(row.id))
                    .exec(&self.conn)
                    .await?;
            }
            None => {
                Subscribers::insert(active_model).exec(&self.conn).await?;
            }
        }

        info!(chat_id, anilist_username, "Registered subscriber");

        let row = Subscribers::find()
            .filter(subscribers::Column::ChatId.eq(chat_id))
            .one(&self.conn)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Subscriber {chat_id} vanished after upsert"))?;

        Ok(Self::map_model(row))
    }

    pub async fn get_by_chat(&self, chat_id: i64) -> Result<Option<Subscriber>> {
        let row = Subscribers::find()
            .filter(subscribers::Column::ChatId.eq(chat_id))
            .one(&self.conn)
            .await?;
        Ok(row.map(Self::map_model))
    }

    pub async fn list_missing_anilist_id(&self) -> Result<Vec<Subscriber>> {
        let rows = Subscribers::find()
            .filter(subscribers::Column::AnilistId.is_null())
            .order_by_asc(subscribers::Column::Id)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Self::map_model).collect())
    }

    pub async fn set_anilist_id(&self, subscriber_id: i32, anilist_id: i64) -> Result<()> {
        Subscribers::update_many()
            .col_expr(
                subscribers::Column::AnilistId,
                sea_orm::sea_query::Expr::value(anilist_id),
            )
            .filter(subscribers::Column::Id.eq(subscriber_id))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Adds watch records, ignoring pairs that already exist. Each pair starts
    /// at the given episode so only later episodes are announced. Returns how
    /// many were new.
    pub async fn add_watch_records(
        &self,
        subscriber_id: i32,
        titles: &[(TitleId, i32)],
    ) -> Result<u64> {
        if titles.is_empty() {
            return Ok(0);
        }

        let models = titles.iter().map(|(id, episode)| watch_records::ActiveModel {
            subscriber_id: Set(subscriber_id),
            title_id: Set(id.value()),
            notified_episode: Set(*episode),
            ..Default::default()
        });

        let inserted = WatchRecords::insert_many(models)
            .on_conflict(
                sea_orm::sea_query::OnConflict::columns([
                    watch_records::Column::SubscriberId,
                    watch_records::Column::TitleId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        Ok(inserted)
    }

    pub async fn watched_titles(&self, subscriber_id: i32) -> Result<Vec<TitleId>> {
        let ids: Vec<i32> = WatchRecords::find()
            .select_only()
            .column(watch_records::Column::TitleId)
            .filter(watch_records::Column::SubscriberId.eq(subscriber_id))
            .order_by_asc(watch_records::Column::TitleId)
            .into_tuple()
            .all(&self.conn)
            .await?;
        Ok(ids.into_iter().map(TitleId::new).collect())
    }

    /// Distinct subscribers watching at least one of `titles`.
    pub async fn watchers_of(&self, titles: &[TitleId]) -> Result<Vec<Subscriber>> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<i32> = titles.iter().map(|id| id.value()).collect();
        let rows = Subscribers::find()
            .join(
                JoinType::InnerJoin,
                subscribers::Relation::WatchRecords.def(),
            )
            .filter(watch_records::Column::TitleId.is_in(raw))
            .distinct()
            .order_by_asc(subscribers::Column::Id)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(Self::map_model).collect())
    }
}
