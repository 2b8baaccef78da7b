//! Migration to create the suppression_cache table.
//!
//! Local mirror of CRM records keyed by canonical key. Collectors and the
//! pusher consult it so prospects already in the CRM are never re-pushed.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SuppressionCache::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SuppressionCache::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SuppressionCache::CanonicalKey)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(SuppressionCache::CrmPageId).text().not_null())
                    .col(ColumnDef::new(SuppressionCache::Status).text().not_null())
                    .col(ColumnDef::new(SuppressionCache::CompanyName).text().null())
                    .col(ColumnDef::new(SuppressionCache::CachedAt).timestamp().not_null())
                    .col(ColumnDef::new(SuppressionCache::ExpiresAt).timestamp().not_null())
                    .col(ColumnDef::new(SuppressionCache::Metadata).json().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_suppression_expires_at")
                    .table(SuppressionCache::Table)
                    .col(SuppressionCache::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_suppression_expires_at").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SuppressionCache::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SuppressionCache {
    Table,
    Id,
    CanonicalKey,
    CrmPageId,
    Status,
    CompanyName,
    CachedAt,
    ExpiresAt,
    Metadata,
}
