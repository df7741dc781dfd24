//! Migration to create the repo_connections table.
//!
//! Each row links exactly one workspace or module to a hook. The hook is
//! garbage once no row references it.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RepoConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RepoConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RepoConnections::HookId).uuid().not_null())
                    .col(
                        ColumnDef::new(RepoConnections::VcsProviderId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RepoConnections::WorkspaceId).text().null())
                    .col(ColumnDef::new(RepoConnections::ModuleId).text().null())
                    .col(
                        ColumnDef::new(RepoConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .check(Expr::cust(
                        "(workspace_id IS NULL) <> (module_id IS NULL)",
                    ))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_repo_connections_hook_id")
                            .from(RepoConnections::Table, RepoConnections::HookId)
                            .to(Hooks::Table, Hooks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_repo_connections_vcs_provider_id")
                            .from(RepoConnections::Table, RepoConnections::VcsProviderId)
                            .to(VcsProviders::Table, VcsProviders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_repo_connections_workspace_id")
                    .table(RepoConnections::Table)
                    .col(RepoConnections::WorkspaceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_repo_connections_module_id")
                    .table(RepoConnections::Table)
                    .col(RepoConnections::ModuleId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Reference counting and unreferenced-hook scans filter on hook_id.
        manager
            .create_index(
                Index::create()
                    .name("idx_repo_connections_hook_id")
                    .table(RepoConnections::Table)
                    .col(RepoConnections::HookId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_repo_connections_hook_id",
            "idx_repo_connections_module_id",
            "idx_repo_connections_workspace_id",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(RepoConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RepoConnections {
    Table,
    Id,
    HookId,
    VcsProviderId,
    WorkspaceId,
    ModuleId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Hooks {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum VcsProviders {
    Table,
    Id,
}
