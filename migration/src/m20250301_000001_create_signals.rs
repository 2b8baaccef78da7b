//! Migration to create the signals table.
//!
//! Signals are the raw evidence rows produced by collectors. The composite
//! unique index makes re-ingestion of the same source event a no-op.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Signals::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Signals::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Signals::SignalType).text().not_null())
                    .col(ColumnDef::new(Signals::SourceApi).text().not_null())
                    .col(ColumnDef::new(Signals::CanonicalKey).text().not_null())
                    .col(ColumnDef::new(Signals::CompanyName).text().null())
                    .col(ColumnDef::new(Signals::Confidence).double().not_null())
                    .col(ColumnDef::new(Signals::RawData).json().not_null())
                    .col(ColumnDef::new(Signals::SourceUrl).text().null())
                    .col(ColumnDef::new(Signals::SourceResponseHash).text().null())
                    .col(ColumnDef::new(Signals::DetectedAt).timestamp().not_null())
                    .col(ColumnDef::new(Signals::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        // Dedup identity: one row per observed source event.
        manager
            .create_index(
                Index::create()
                    .name("uq_signals_event_identity")
                    .table(Signals::Table)
                    .col(Signals::CanonicalKey)
                    .col(Signals::SignalType)
                    .col(Signals::SourceApi)
                    .col(Signals::DetectedAt)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_signals_canonical_key")
                    .table(Signals::Table)
                    .col(Signals::CanonicalKey)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_signals_type_detected")
                    .table(Signals::Table)
                    .col(Signals::SignalType)
                    .col(Signals::DetectedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_signals_event_identity").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_signals_canonical_key").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_signals_type_detected").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Signals::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Signals {
    Table,
    Id,
    SignalType,
    SourceApi,
    CanonicalKey,
    CompanyName,
    Confidence,
    RawData,
    SourceUrl,
    SourceResponseHash,
    DetectedAt,
    CreatedAt,
}
