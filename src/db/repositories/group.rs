use crate::db::repositories::subscriber::SubscriberRepository;
use crate::db::repositories::title::TitleRepository;
use crate::domain::events::{Notification, NotificationKind, has_new_episode, status_transition};
use crate::domain::{Group, MediaStatus, TitleId};
use crate::entities::{franchise_groups, prelude::*, subscribers, titles, watch_records};
use anyhow::Result;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, JoinType, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Result of committing one group.
#[derive(Debug, Default)]
pub struct AppliedGroup {
    /// Notifications to hand to the dispatcher, already committed as delivered.
    pub events: Vec<Notification>,
    /// Titles that left this group because the new resolution no longer reaches them.
    pub released: usize,
    /// Previous groups that lost their last member and were removed.
    pub dissolved: Vec<TitleId>,
}

pub struct GroupRepository {
    conn: DatabaseConnection,
}

impl GroupRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Writes membership for every member, compares each member's status with
    /// its baseline, stores the new baselines and episode counters, and returns
    /// the resulting notifications. Everything happens in one transaction so a
    /// transition is either recorded with its events or not at all.
    pub async fn apply(&self, group: &Group) -> Result<AppliedGroup> {
        let canonical = group.canonical_id.value();
        let member_ids: Vec<i32> = group.members.iter().map(|id| id.value()).collect();
        let now = chrono::Utc::now().to_rfc3339();

        let txn = self.conn.begin().await?;

        FranchiseGroups::insert(franchise_groups::ActiveModel {
            canonical_id: Set(canonical),
            member_count: Set(i32::try_from(member_ids.len()).unwrap_or(i32::MAX)),
            resolved_at: Set(now),
        })
        .on_conflict(
            sea_orm::sea_query::OnConflict::column(franchise_groups::Column::CanonicalId)
                .update_columns([
                    franchise_groups::Column::MemberCount,
                    franchise_groups::Column::ResolvedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(&txn)
        .await?;

        let members = Titles::find()
            .filter(titles::Column::Id.is_in(member_ids.clone()))
            .order_by_asc(titles::Column::Id)
            .all(&txn)
            .await?;

        if members.len() != member_ids.len() {
            warn!(
                canonical_id = canonical,
                expected = member_ids.len(),
                stored = members.len(),
                "Applying group with members missing from the store"
            );
        }

        let previous_groups: BTreeSet<i32> = members
            .iter()
            .filter_map(|m| m.group_id)
            .filter(|g| *g != canonical)
            .collect();

        let released = Titles::update_many()
            .col_expr(
                titles::Column::GroupId,
                sea_orm::sea_query::Expr::value(Option::<i32>::None),
            )
            .filter(titles::Column::GroupId.eq(canonical))
            .filter(titles::Column::Id.is_not_in(member_ids.clone()))
            .exec(&txn)
            .await?
            .rows_affected;

        Titles::update_many()
            .col_expr(
                titles::Column::GroupId,
                sea_orm::sea_query::Expr::value(canonical),
            )
            .filter(titles::Column::Id.is_in(member_ids.clone()))
            .exec(&txn)
            .await?;

        let mut dissolved = Vec::new();
        for old in previous_groups {
            let remaining = Titles::find()
                .filter(titles::Column::GroupId.eq(old))
                .count(&txn)
                .await?;
            if remaining == 0 {
                FranchiseGroups::delete_by_id(old).exec(&txn).await?;
                dissolved.push(TitleId::new(old));
            }
        }

        // Watch records of every member, joined with their subscriber's chat.
        let records: Vec<(i32, i32, i32, i32, i64)> = WatchRecords::find()
            .select_only()
            .column(watch_records::Column::Id)
            .column(watch_records::Column::SubscriberId)
            .column(watch_records::Column::TitleId)
            .column(watch_records::Column::NotifiedEpisode)
            .column(subscribers::Column::ChatId)
            .join(
                JoinType::InnerJoin,
                watch_records::Relation::Subscribers.def(),
            )
            .filter(watch_records::Column::TitleId.is_in(member_ids))
            .order_by_asc(watch_records::Column::SubscriberId)
            .into_tuple()
            .all(&txn)
            .await?;

        // Group watchers: everyone watching any member hears about every member.
        let watchers: BTreeMap<i32, i64> = records
            .iter()
            .map(|(_, subscriber_id, _, _, chat_id)| (*subscriber_id, *chat_id))
            .collect();

        let mut events = Vec::new();
        for model in members {
            let baseline = model
                .baseline_status
                .as_deref()
                .and_then(|s| s.parse::<MediaStatus>().ok());
            let title = TitleRepository::map_model(model)?;

            let transition = status_transition(baseline, title.status);
            if let Some(kind) = transition {
                events.extend(watchers.values().map(|chat_id| Notification {
                    chat_id: *chat_id,
                    kind,
                    title: title.clone(),
                }));
            }

            for (record_id, _, title_id, notified, chat_id) in &records {
                if *title_id != title.id.value()
                    || !has_new_episode(*notified, title.latest_aired_episode)
                {
                    continue;
                }
                if transition.is_none() {
                    events.push(Notification {
                        chat_id: *chat_id,
                        kind: NotificationKind::EpisodeUpdate,
                        title: title.clone(),
                    });
                }
                WatchRecords::update_many()
                    .col_expr(
                        watch_records::Column::NotifiedEpisode,
                        sea_orm::sea_query::Expr::value(title.latest_aired_episode.unwrap_or(0)),
                    )
                    .filter(watch_records::Column::Id.eq(*record_id))
                    .exec(&txn)
                    .await?;
            }

            if baseline != Some(title.status) {
                Titles::update_many()
                    .col_expr(
                        titles::Column::BaselineStatus,
                        sea_orm::sea_query::Expr::value(title.status.as_str()),
                    )
                    .filter(titles::Column::Id.eq(title.id.value()))
                    .exec(&txn)
                    .await?;
            }
        }

        txn.commit().await?;

        debug!(
            canonical_id = canonical,
            members = group.len(),
            events = events.len(),
            released,
            "Applied group"
        );

        Ok(AppliedGroup {
            events,
            released: usize::try_from(released).unwrap_or(usize::MAX),
            dissolved,
        })
    }

    /// Members of a stored group with their watchers, as seen by the CLI.
    pub async fn watchers_of_group(
        &self,
        canonical_id: TitleId,
    ) -> Result<Vec<crate::db::repositories::subscriber::Subscriber>> {
        let members: Vec<i32> = Titles::find()
            .select_only()
            .column(titles::Column::Id)
            .filter(titles::Column::GroupId.eq(canonical_id.value()))
            .into_tuple()
            .all(&self.conn)
            .await?;

        let members: Vec<TitleId> = members.into_iter().map(TitleId::new).collect();
        SubscriberRepository::new(self.conn.clone())
            .watchers_of(&members)
            .await
    }

    pub async fn count(&self) -> Result<u64> {
        Ok(FranchiseGroups::find().count(&self.conn).await?)
    }
}
