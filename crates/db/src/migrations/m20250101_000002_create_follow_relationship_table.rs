//! Create `follow_relationship` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FollowRelationship::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FollowRelationship::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FollowRelationship::FollowerId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FollowRelationship::FolloweeId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FollowRelationship::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(FollowRelationship::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(FollowRelationship::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_follow_relationship_follower")
                            .from(FollowRelationship::Table, FollowRelationship::FollowerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_follow_relationship_followee")
                            .from(FollowRelationship::Table, FollowRelationship::FolloweeId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (follower_id, followee_id) - at most one row per pair
        manager
            .create_index(
                Index::create()
                    .name("idx_follow_relationship_follower_followee")
                    .table(FollowRelationship::Table)
                    .col(FollowRelationship::FollowerId)
                    .col(FollowRelationship::FolloweeId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: (followee_id, status) (for follower lists and pending requests)
        manager
            .create_index(
                Index::create()
                    .name("idx_follow_relationship_followee_status")
                    .table(FollowRelationship::Table)
                    .col(FollowRelationship::FolloweeId)
                    .col(FollowRelationship::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FollowRelationship::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum FollowRelationship {
    Table,
    Id,
    FollowerId,
    FolloweeId,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
