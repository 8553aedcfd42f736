use crate::domain::{MediaFormat, MediaStatus, Title, TitleId};
use crate::entities::{prelude::*, titles};
use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use std::collections::HashSet;
use tracing::debug;

/// Outcome of writing one catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleWrite {
    Inserted,
    /// A newer record replaced the stored one. `regroup` is set when the change
    /// is one the group application has to look at.
    Updated { regroup: bool },
    /// The stored record is as new or newer.
    Unchanged,
}

impl TitleWrite {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

pub struct TitleRepository {
    conn: DatabaseConnection,
}

impl TitleRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub(crate) fn map_model(model: titles::Model) -> Result<Title> {
        let status = model
            .status
            .parse::<MediaStatus>()
            .with_context(|| format!("Stored title {} has an invalid status", model.id))?;
        let format = model
            .format
            .parse::<MediaFormat>()
            .unwrap_or(MediaFormat::Unknown);

        Ok(Title {
            id: TitleId::new(model.id),
            name: model.name,
            format,
            status,
            episodes: model.episodes,
            latest_aired_episode: model.latest_aired_episode,
            cover_url: model.cover_url,
            start_at: model.start_at,
            updated_at: model.updated_at,
        })
    }

    /// Last-write-wins by the source timestamp. New rows start without a
    /// baseline status and without a group; an existing baseline is never
    /// touched here.
    pub async fn upsert(&self, title: &Title) -> Result<TitleWrite> {
        let txn = self.conn.begin().await?;

        let existing = Titles::find_by_id(title.id.value()).one(&txn).await?;

        let outcome = match &existing {
            Some(row) if row.updated_at >= title.updated_at => TitleWrite::Unchanged,
            Some(row) => TitleWrite::Updated {
                regroup: row.status != title.status.as_str()
                    || row.latest_aired_episode != title.latest_aired_episode
                    || row.start_at != title.start_at,
            },
            None => TitleWrite::Inserted,
        };

        if outcome == TitleWrite::Unchanged {
            txn.commit().await?;
            return Ok(outcome);
        }

        let active_model = titles::ActiveModel {
            id: Set(title.id.value()),
            name: Set(title.name.clone()),
            format: Set(title.format.as_str().to_string()),
            status: Set(title.status.as_str().to_string()),
            episodes: Set(title.episodes),
            latest_aired_episode: Set(title.latest_aired_episode),
            cover_url: Set(title.cover_url.clone()),
            start_at: Set(title.start_at),
            updated_at: Set(title.updated_at),
            baseline_status: Set(None),
            group_id: Set(None),
        };

        Titles::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(titles::Column::Id)
                    .update_columns([
                        titles::Column::Name,
                        titles::Column::Format,
                        titles::Column::Status,
                        titles::Column::Episodes,
                        titles::Column::LatestAiredEpisode,
                        titles::Column::CoverUrl,
                        titles::Column::StartAt,
                        titles::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        if let TitleWrite::Updated { regroup: true } = outcome {
            Titles::update_many()
                .col_expr(
                    titles::Column::GroupId,
                    sea_orm::sea_query::Expr::value(Option::<i32>::None),
                )
                .filter(titles::Column::Id.eq(title.id.value()))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;

        debug!(title_id = %title.id, ?outcome, "Stored title");
        Ok(outcome)
    }

    pub async fn get(&self, id: TitleId) -> Result<Option<Title>> {
        Titles::find_by_id(id.value())
            .one(&self.conn)
            .await?
            .map(Self::map_model)
            .transpose()
    }

    pub async fn get_by_ids(&self, ids: &[TitleId]) -> Result<Vec<Title>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<i32> = ids.iter().map(|id| id.value()).collect();
        Titles::find()
            .filter(titles::Column::Id.is_in(raw))
            .order_by_asc(titles::Column::Id)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(Self::map_model)
            .collect()
    }

    pub async fn exists(&self, id: TitleId) -> Result<bool> {
        let count = Titles::find_by_id(id.value()).count(&self.conn).await?;
        Ok(count > 0)
    }

    /// Subset of `ids` already present in the store.
    pub async fn existing_ids(&self, ids: &[TitleId]) -> Result<HashSet<TitleId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let raw: Vec<i32> = ids.iter().map(|id| id.value()).collect();
        let found: Vec<i32> = Titles::find()
            .select_only()
            .column(titles::Column::Id)
            .filter(titles::Column::Id.is_in(raw))
            .into_tuple()
            .all(&self.conn)
            .await?;

        Ok(found.into_iter().map(TitleId::new).collect())
    }

    /// One ungrouped title, skipping the first `offset` of them in id order.
    pub async fn find_ungrouped(&self, offset: u64) -> Result<Option<TitleId>> {
        let id: Option<i32> = Titles::find()
            .select_only()
            .column(titles::Column::Id)
            .filter(titles::Column::GroupId.is_null())
            .order_by_asc(titles::Column::Id)
            .offset(offset)
            .limit(1)
            .into_tuple()
            .one(&self.conn)
            .await?;

        Ok(id.map(TitleId::new))
    }

    pub async fn count_ungrouped(&self) -> Result<u64> {
        let count = Titles::find()
            .filter(titles::Column::GroupId.is_null())
            .count(&self.conn)
            .await?;
        Ok(count)
    }

    pub async fn group_of(&self, id: TitleId) -> Result<Option<TitleId>> {
        let group: Option<Option<i32>> = Titles::find_by_id(id.value())
            .select_only()
            .column(titles::Column::GroupId)
            .into_tuple()
            .one(&self.conn)
            .await?;

        Ok(group.flatten().map(TitleId::new))
    }

    pub async fn members_of(&self, canonical_id: TitleId) -> Result<Vec<TitleId>> {
        let ids: Vec<i32> = Titles::find()
            .select_only()
            .column(titles::Column::Id)
            .filter(titles::Column::GroupId.eq(canonical_id.value()))
            .order_by_asc(titles::Column::Id)
            .into_tuple()
            .all(&self.conn)
            .await?;

        Ok(ids.into_iter().map(TitleId::new).collect())
    }

    /// Baseline status recorded at the last group application.
    pub async fn baseline_status(&self, id: TitleId) -> Result<Option<MediaStatus>> {
        let baseline: Option<Option<String>> = Titles::find_by_id(id.value())
            .select_only()
            .column(titles::Column::BaselineStatus)
            .into_tuple()
            .one(&self.conn)
            .await?;

        Ok(baseline.flatten().and_then(|s| s.parse().ok()))
    }

    pub async fn count(&self) -> Result<u64> {
        Ok(Titles::find().count(&self.conn).await?)
    }
}
