//! Migration to create the vcs_providers table.
//!
//! A VCS provider holds the credentials used to talk to one source-control
//! host on behalf of an organization. Tokens are stored encrypted.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(VcsProviders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VcsProviders::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VcsProviders::Name).text().not_null())
                    .col(ColumnDef::new(VcsProviders::Organization).text().not_null())
                    .col(ColumnDef::new(VcsProviders::Cloud).text().not_null())
                    .col(ColumnDef::new(VcsProviders::ApiBase).text().null())
                    .col(
                        ColumnDef::new(VcsProviders::TokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VcsProviders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(VcsProviders::UpdatedAt)
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
                    .name("idx_vcs_providers_organization")
                    .table(VcsProviders::Table)
                    .col(VcsProviders::Organization)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_vcs_providers_organization")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(VcsProviders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum VcsProviders {
    Table,
    Id,
    Name,
    Organization,
    Cloud,
    ApiBase,
    TokenCiphertext,
    CreatedAt,
    UpdatedAt,
}
