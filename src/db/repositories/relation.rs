use crate::domain::{MediaFormat, RelationEdge, RelationKind, TitleId};
use crate::entities::{prelude::*, relation_edges, titles};
use anyhow::Result;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use std::collections::BTreeSet;
use tracing::debug;

pub struct RelationRepository {
    conn: DatabaseConnection,
}

impl RelationRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn map_model(model: relation_edges::Model) -> RelationEdge {
        RelationEdge {
            source: TitleId::new(model.source_id),
            target: TitleId::new(model.target_id),
            kind: model
                .relation
                .parse::<RelationKind>()
                .unwrap_or(RelationKind::Other),
            target_format: model
                .target_format
                .parse::<MediaFormat>()
                .unwrap_or(MediaFormat::Unknown),
            discovered_at: model.discovered_at,
        }
    }

    /// Per-edge last-write-wins by discovery timestamp. Every accepted write
    /// clears the owning title's group so it gets regrouped. Returns the
    /// number of edges written.
    pub async fn upsert_many(&self, edges: &[RelationEdge]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }

        let txn = self.conn.begin().await?;
        let mut invalidated = BTreeSet::new();

        let written = Self::write_edges(&txn, edges, &mut invalidated).await?;
        Self::invalidate(&txn, &invalidated).await?;

        txn.commit().await?;

        debug!(
            received = edges.len(),
            written,
            invalidated = invalidated.len(),
            "Stored relation edges"
        );
        Ok(written)
    }

    /// Makes `edges` the complete edge set of `source` as observed at
    /// `observed_at`. Stored edges from older observations that the new record
    /// no longer reports are removed. Returns `(written, removed)`.
    pub async fn replace_for_source(
        &self,
        source: TitleId,
        edges: &[RelationEdge],
        observed_at: i64,
    ) -> Result<(usize, u64)> {
        let txn = self.conn.begin().await?;
        let mut invalidated = BTreeSet::new();

        let keep: Vec<(i32, String)> = edges
            .iter()
            .filter(|e| e.source == source)
            .map(|e| (e.target.value(), e.kind.as_str().to_string()))
            .collect();

        let stale: Vec<relation_edges::Model> = RelationEdges::find()
            .filter(relation_edges::Column::SourceId.eq(source.value()))
            .filter(relation_edges::Column::DiscoveredAt.lt(observed_at))
            .all(&txn)
            .await?
            .into_iter()
            .filter(|row| !keep.contains(&(row.target_id, row.relation.clone())))
            .collect();

        let mut removed = 0;
        for row in stale {
            removed += RelationEdges::delete_by_id((row.source_id, row.target_id, row.relation))
                .exec(&txn)
                .await?
                .rows_affected;
        }
        if removed > 0 {
            invalidated.insert(source.value());
        }

        let written = Self::write_edges(&txn, edges, &mut invalidated).await?;
        Self::invalidate(&txn, &invalidated).await?;

        txn.commit().await?;

        debug!(
            source_id = %source,
            written,
            removed,
            "Replaced relation edges"
        );
        Ok((written, removed))
    }

    async fn write_edges(
        txn: &DatabaseTransaction,
        edges: &[RelationEdge],
        invalidated: &mut BTreeSet<i32>,
    ) -> Result<usize> {
        let mut written = 0;

        for edge in edges {
            let existing = RelationEdges::find_by_id((
                edge.source.value(),
                edge.target.value(),
                edge.kind.as_str().to_string(),
            ))
            .one(txn)
            .await?;

            if let Some(row) = existing {
                if row.discovered_at > edge.discovered_at {
                    continue;
                }
                if row.discovered_at == edge.discovered_at
                    && row.target_format == edge.target_format.as_str()
                {
                    continue;
                }
            }

            let active_model = relation_edges::ActiveModel {
                source_id: Set(edge.source.value()),
                target_id: Set(edge.target.value()),
                relation: Set(edge.kind.as_str().to_string()),
                target_format: Set(edge.target_format.as_str().to_string()),
                discovered_at: Set(edge.discovered_at),
            };

            RelationEdges::insert(active_model)
                .on_conflict(
                    sea_orm::sea_query::OnConflict::columns([
                        relation_edges::Column::SourceId,
                        relation_edges::Column::TargetId,
                        relation_edges::Column::Relation,
                    ])
                    .update_columns([
                        relation_edges::Column::TargetFormat,
                        relation_edges::Column::DiscoveredAt,
                    ])
                    .to_owned(),
                )
                .exec_without_returning(txn)
                .await?;

            written += 1;
            invalidated.insert(edge.source.value());
        }

        Ok(written)
    }

    async fn invalidate(txn: &DatabaseTransaction, sources: &BTreeSet<i32>) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }

        Titles::update_many()
            .col_expr(
                titles::Column::GroupId,
                sea_orm::sea_query::Expr::value(Option::<i32>::None),
            )
            .filter(titles::Column::Id.is_in(sources.iter().copied()))
            .exec(txn)
            .await?;
        Ok(())
    }

    /// Edges reported by `source` as last stored.
    pub async fn for_source(&self, source: TitleId) -> Result<Vec<RelationEdge>> {
        let rows = RelationEdges::find()
            .filter(relation_edges::Column::SourceId.eq(source.value()))
            .order_by_asc(relation_edges::Column::TargetId)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(Self::map_model).collect())
    }

    /// Stored edges pointing at `target`, from whichever title reported them.
    pub async fn for_target(&self, target: TitleId) -> Result<Vec<RelationEdge>> {
        let rows = RelationEdges::find()
            .filter(relation_edges::Column::TargetId.eq(target.value()))
            .order_by_asc(relation_edges::Column::SourceId)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(Self::map_model).collect())
    }
}
