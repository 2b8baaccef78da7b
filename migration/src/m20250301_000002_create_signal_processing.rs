//! Migration to create the signal_processing table.
//!
//! One row per signal, created together with the signal. Tracks routing
//! outcome (pending/pushed/rejected) and the CRM page the signal landed on.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SignalProcessing::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SignalProcessing::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SignalProcessing::SignalId).uuid().not_null())
                    .col(ColumnDef::new(SignalProcessing::Status).text().not_null())
                    .col(ColumnDef::new(SignalProcessing::CrmPageId).text().null())
                    .col(ColumnDef::new(SignalProcessing::ProcessedAt).timestamp().null())
                    .col(ColumnDef::new(SignalProcessing::ErrorMessage).text().null())
                    .col(ColumnDef::new(SignalProcessing::Metadata).json().null())
                    .col(ColumnDef::new(SignalProcessing::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(SignalProcessing::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_signal_processing_signal_id")
                            .from(SignalProcessing::Table, SignalProcessing::SignalId)
                            .to(Signals::Table, Signals::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_signal_processing_signal_id")
                    .table(SignalProcessing::Table)
                    .col(SignalProcessing::SignalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_signal_processing_status")
                    .table(SignalProcessing::Table)
                    .col(SignalProcessing::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uq_signal_processing_signal_id")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_signal_processing_status").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SignalProcessing::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SignalProcessing {
    Table,
    Id,
    SignalId,
    Status,
    CrmPageId,
    ProcessedAt,
    ErrorMessage,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Signals {
    Table,
    Id,
}
