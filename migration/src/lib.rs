//! Database migrations for the discovery pipeline store.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_signals;
mod m20250301_000002_create_signal_processing;
mod m20250301_000003_create_suppression_cache;
mod m20250412_000001_create_pipeline_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_signals::Migration),
            Box::new(m20250301_000002_create_signal_processing::Migration),
            Box::new(m20250301_000003_create_suppression_cache::Migration),
            Box::new(m20250412_000001_create_pipeline_runs::Migration),
        ]
    }
}
