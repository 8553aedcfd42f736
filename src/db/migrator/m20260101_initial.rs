use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(FranchiseGroups)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Titles)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(RelationEdges)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Subscribers)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(WatchRecords)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(ScanState)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Ungrouped lookups and member listings both go through group_id
        manager
            .create_index(
                Index::create()
                    .name("idx_titles_group_id")
                    .table(TitleIdx::Titles)
                    .col(TitleIdx::GroupId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_relation_edges_target")
                    .table(EdgeIdx::RelationEdges)
                    .col(EdgeIdx::TargetId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_watch_records_pair")
                    .table(WatchIdx::WatchRecords)
                    .col(WatchIdx::SubscriberId)
                    .col(WatchIdx::TitleId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScanState).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WatchRecords).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscribers).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RelationEdges).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Titles).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FranchiseGroups).if_exists().to_owned())
            .await
    }
}

#[derive(Iden)]
enum TitleIdx {
    Titles,
    GroupId,
}

#[derive(Iden)]
enum EdgeIdx {
    RelationEdges,
    TargetId,
}

#[derive(Iden)]
enum WatchIdx {
    WatchRecords,
    SubscriberId,
    TitleId,
}
