//! Migration to create the hooks table.
//!
//! One hook exists per `(repo_identifier, cloud)` pair and is shared by every
//! resource connected to that repository.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Hooks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Hooks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Hooks::CloudId).text().null())
                    .col(ColumnDef::new(Hooks::Secret).text().not_null())
                    .col(ColumnDef::new(Hooks::RepoIdentifier).text().not_null())
                    .col(ColumnDef::new(Hooks::Cloud).text().not_null())
                    .col(
                        ColumnDef::new(Hooks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_hooks_repo_identifier_cloud")
                    .table(Hooks::Table)
                    .col(Hooks::RepoIdentifier)
                    .col(Hooks::Cloud)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // NULL cloud ids never collide, so unregistered hooks are unaffected.
        manager
            .create_index(
                Index::create()
                    .name("idx_hooks_cloud_cloud_id")
                    .table(Hooks::Table)
                    .col(Hooks::Cloud)
                    .col(Hooks::CloudId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_hooks_cloud_cloud_id").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_hooks_repo_identifier_cloud")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Hooks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Hooks {
    Table,
    Id,
    CloudId,
    Secret,
    RepoIdentifier,
    Cloud,
    CreatedAt,
}
