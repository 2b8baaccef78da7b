//! Migration to create the pipeline_runs table.
//!
//! One row per orchestrator run with phase counters, for operator inspection
//! via `prospector stats`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PipelineRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PipelineRuns::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::RunId)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(PipelineRuns::StartedAt).timestamp().not_null())
                    .col(ColumnDef::new(PipelineRuns::CompletedAt).timestamp().null())
                    .col(ColumnDef::new(PipelineRuns::DurationSeconds).double().null())
                    .col(
                        ColumnDef::new(PipelineRuns::CollectorsRun)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::CollectorsFailed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::SignalsFound)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::SignalsNew)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::SignalsSuppressed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::ProspectsCreated)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::ProspectsUpdated)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::ProspectsSkipped)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipelineRuns::SuppressionSynced)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PipelineRuns::Errors).json().null())
                    .col(ColumnDef::new(PipelineRuns::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pipeline_runs_started_at")
                    .table(PipelineRuns::Table)
                    .col(PipelineRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_pipeline_runs_started_at").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PipelineRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PipelineRuns {
    Table,
    Id,
    RunId,
    StartedAt,
    CompletedAt,
    DurationSeconds,
    CollectorsRun,
    CollectorsFailed,
    SignalsFound,
    SignalsNew,
    SignalsSuppressed,
    ProspectsCreated,
    ProspectsUpdated,
    ProspectsSkipped,
    SuppressionSynced,
    Errors,
    CreatedAt,
}
