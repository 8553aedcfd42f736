use crate::entities::{prelude::*, scan_state};
use anyhow::Result;
use sea_orm::{DatabaseConnection, EntityTrait, Set};

const STATE_ROW: i32 = 1;

pub struct ScanStateRepository {
    conn: DatabaseConnection,
}

impl ScanStateRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Last-modified timestamp of the newest title seen by a completed pass.
    pub async fn checkpoint(&self) -> Result<Option<i64>> {
        let row = ScanState::find_by_id(STATE_ROW).one(&self.conn).await?;
        Ok(row.map(|r| r.checkpoint))
    }

    pub async fn last_pass_at(&self) -> Result<Option<String>> {
        let row = ScanState::find_by_id(STATE_ROW).one(&self.conn).await?;
        Ok(row.and_then(|r| r.last_pass_at))
    }

    pub async fn set_checkpoint(&self, checkpoint: i64) -> Result<()> {
        let active_model = scan_state::ActiveModel {
            id: Set(STATE_ROW),
            checkpoint: Set(checkpoint),
            last_pass_at: Set(Some(chrono::Utc::now().to_rfc3339())),
        };

        ScanState::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(scan_state::Column::Id)
                    .update_columns([scan_state::Column::Checkpoint, scan_state::Column::LastPassAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        Ok(())
    }
}
