use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "subscribers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Chat the notifications are delivered to.
    #[sea_orm(unique)]
    pub chat_id: i64,

    pub anilist_username: String,

    /// Resolved catalog account id; `None` until the watched list was imported.
    pub anilist_id: Option<i64>,

    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::watch_records::Entity")]
    WatchRecords,
}

impl Related<super::watch_records::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WatchRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
