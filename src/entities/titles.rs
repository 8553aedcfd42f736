use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "titles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub name: String,
    pub format: String,
    pub status: String,
    pub episodes: Option<i32>,
    pub latest_aired_episode: Option<i32>,
    pub cover_url: Option<String>,
    pub start_at: i64,
    /// Source-reported last-modified timestamp; writes with an older value are ignored.
    pub updated_at: i64,
    /// Status at the time of the last group application. `None` until the
    /// title has been grouped once.
    pub baseline_status: Option<String>,
    pub group_id: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::franchise_groups::Entity",
        from = "Column::GroupId",
        to = "super::franchise_groups::Column::CanonicalId",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    FranchiseGroups,
}

impl Related<super::franchise_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FranchiseGroups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
