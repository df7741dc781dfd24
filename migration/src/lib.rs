//! Database migrations for the VCS hook service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_000100_create_vcs_providers;
mod m2025_12_01_000200_create_hooks;
mod m2025_12_01_000300_create_repo_connections;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_000100_create_vcs_providers::Migration),
            Box::new(m2025_12_01_000200_create_hooks::Migration),
            Box::new(m2025_12_01_000300_create_repo_connections::Migration),
        ]
    }
}
