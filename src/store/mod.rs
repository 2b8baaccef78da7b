//! # Signal Store
//!
//! Repository over the embedded SQLite database. Owns every piece of
//! persistent state in the pipeline: raw signals, per-signal processing
//! records, the suppression cache mirroring the CRM, and pipeline run
//! metrics.
//!
//! Concurrency contract: single writer, many readers. The connection pool is
//! capped at one connection (see [`crate::db::init_store`]), so write
//! transactions serialize here no matter how many tasks hold a handle.
//! All multi-step mutations run inside one transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::signal::{
    self, ActiveModel as SignalActiveModel, Entity as Signal, Model as SignalModel,
};
use crate::models::signal_processing::{
    self, ActiveModel as ProcessingActiveModel, Entity as Processing, Model as ProcessingModel,
    STATUS_PENDING, STATUS_PUSHED, STATUS_REJECTED,
};
use crate::models::signal_type::SignalType;
use crate::models::suppression_entry::{
    self, ActiveModel as SuppressionActiveModel, Entity as Suppression, Model as SuppressionModel,
};
use crate::models::pipeline_run::{ActiveModel as PipelineRunActiveModel, Model as PipelineRunModel};

/// A signal as a collector hands it to the store.
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub signal_type: SignalType,
    pub source_api: String,
    pub canonical_key: String,
    pub company_name: Option<String>,
    pub confidence: f64,
    pub raw_data: JsonValue,
    pub source_url: Option<String>,
    pub source_response_hash: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Result of [`SignalStore::save_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub signal_id: Uuid,
    /// `false` when the row already existed (idempotent re-ingest).
    pub inserted: bool,
}

/// A signal joined with its processing record.
#[derive(Debug, Clone)]
pub struct StoredSignal {
    pub signal: SignalModel,
    pub processing: Option<ProcessingModel>,
}

impl StoredSignal {
    pub fn processing_status(&self) -> Option<&str> {
        self.processing.as_ref().map(|p| p.status.as_str())
    }
}

/// One entry for the suppression cache batch upsert.
#[derive(Debug, Clone)]
pub struct SuppressionUpsert {
    pub canonical_key: String,
    pub crm_page_id: String,
    pub status: String,
    pub company_name: Option<String>,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub metadata: Option<JsonValue>,
}

/// Aggregate counts for `prospector stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub total_signals: u64,
    pub signals_by_type: BTreeMap<String, u64>,
    pub processing_by_status: BTreeMap<String, u64>,
    pub active_suppression_entries: u64,
}

/// Repository handle. Cheap to clone; all clones share the connection.
#[derive(Clone)]
pub struct SignalStore {
    db: DatabaseConnection,
}

impl SignalStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Begin a transaction for callers that need multi-step writes beyond
    /// the store's own operations. Commit-or-rollback is on the caller.
    pub async fn begin(&self) -> Result<DatabaseTransaction, StoreError> {
        Ok(self.db.begin().await?)
    }

    /// Persist a signal together with its pending processing record.
    ///
    /// Idempotent: re-ingesting a row with the same
    /// `(canonical_key, signal_type, source_api, detected_at)` returns the
    /// existing id with `inserted = false` and writes nothing.
    pub async fn save_signal(&self, new: NewSignal) -> Result<SaveOutcome, StoreError> {
        let now = Utc::now();
        let signal_id = Uuid::new_v4();

        let txn = self.db.begin().await?;

        let row = SignalActiveModel {
            id: Set(signal_id),
            signal_type: Set(new.signal_type.as_str().to_string()),
            source_api: Set(new.source_api.clone()),
            canonical_key: Set(new.canonical_key.clone()),
            company_name: Set(new.company_name.clone()),
            confidence: Set(new.confidence),
            raw_data: Set(new.raw_data.clone()),
            source_url: Set(new.source_url.clone()),
            source_response_hash: Set(new.source_response_hash.clone()),
            detected_at: Set(new.detected_at),
            created_at: Set(now),
        };

        match row.insert(&txn).await {
            Ok(_) => {}
            Err(err) => {
                txn.rollback().await?;
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    let existing = Signal::find()
                        .filter(signal::Column::CanonicalKey.eq(new.canonical_key.as_str()))
                        .filter(signal::Column::SignalType.eq(new.signal_type.as_str()))
                        .filter(signal::Column::SourceApi.eq(new.source_api.as_str()))
                        .filter(signal::Column::DetectedAt.eq(new.detected_at))
                        .one(&self.db)
                        .await?
                        .ok_or(StoreError::Database(err))?;
                    debug!(
                        canonical_key = %new.canonical_key,
                        signal_id = %existing.id,
                        "duplicate signal, returning existing row"
                    );
                    return Ok(SaveOutcome {
                        signal_id: existing.id,
                        inserted: false,
                    });
                }
                return Err(StoreError::Database(err));
            }
        }

        let processing = ProcessingActiveModel {
            id: Set(Uuid::new_v4()),
            signal_id: Set(signal_id),
            status: Set(STATUS_PENDING.to_string()),
            crm_page_id: Set(None),
            processed_at: Set(None),
            error_message: Set(None),
            metadata: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        processing.insert(&txn).await?;

        txn.commit().await?;

        debug!(
            signal_id = %signal_id,
            signal_type = %new.signal_type,
            canonical_key = %new.canonical_key,
            "saved signal"
        );

        Ok(SaveOutcome {
            signal_id,
            inserted: true,
        })
    }

    /// Any signal already stored for this canonical key?
    pub async fn is_duplicate(&self, canonical_key: &str) -> Result<bool, StoreError> {
        let count = Signal::find()
            .filter(signal::Column::CanonicalKey.eq(canonical_key))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn get_signal(&self, signal_id: Uuid) -> Result<StoredSignal, StoreError> {
        let found = Signal::find_by_id(signal_id)
            .find_also_related(Processing)
            .one(&self.db)
            .await?;

        match found {
            Some((signal, processing)) => Ok(StoredSignal { signal, processing }),
            None => Err(StoreError::NotFound {
                entity: "signal",
                id: signal_id.to_string(),
            }),
        }
    }

    /// Pending signals, oldest first.
    pub async fn get_pending_signals(
        &self,
        limit: Option<u64>,
        signal_type: Option<SignalType>,
    ) -> Result<Vec<StoredSignal>, StoreError> {
        let mut query = Signal::find()
            .find_also_related(Processing)
            .filter(signal_processing::Column::Status.eq(STATUS_PENDING))
            .order_by_asc(signal::Column::DetectedAt);

        if let Some(t) = signal_type {
            query = query.filter(signal::Column::SignalType.eq(t.as_str()));
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let rows = query.all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|(signal, processing)| StoredSignal { signal, processing })
            .collect())
    }

    /// All signals for one canonical key, ordered by `detected_at` ascending.
    pub async fn get_signals_for_company(
        &self,
        canonical_key: &str,
    ) -> Result<Vec<StoredSignal>, StoreError> {
        let rows = Signal::find()
            .find_also_related(Processing)
            .filter(signal::Column::CanonicalKey.eq(canonical_key))
            .order_by_asc(signal::Column::DetectedAt)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(signal, processing)| StoredSignal { signal, processing })
            .collect())
    }

    /// Transition a processing record `pending -> pushed`.
    pub async fn mark_pushed(
        &self,
        signal_id: Uuid,
        crm_page_id: &str,
        metadata: Option<JsonValue>,
    ) -> Result<(), StoreError> {
        self.transition(signal_id, STATUS_PUSHED, Some(crm_page_id), None, metadata)
            .await
    }

    /// Transition a processing record `pending -> rejected`.
    pub async fn mark_rejected(
        &self,
        signal_id: Uuid,
        reason: &str,
        metadata: Option<JsonValue>,
    ) -> Result<(), StoreError> {
        self.transition(signal_id, STATUS_REJECTED, None, Some(reason), metadata)
            .await
    }

    async fn transition(
        &self,
        signal_id: Uuid,
        to: &str,
        crm_page_id: Option<&str>,
        error_message: Option<&str>,
        metadata: Option<JsonValue>,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;

        let record = Processing::find()
            .filter(signal_processing::Column::SignalId.eq(signal_id))
            .one(&txn)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "processing record",
                id: signal_id.to_string(),
            })?;

        if record.status != STATUS_PENDING {
            txn.rollback().await?;
            return Err(StoreError::InvalidTransition {
                signal_id: signal_id.to_string(),
                from: record.status,
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        let mut active: ProcessingActiveModel = record.into();
        active.status = Set(to.to_string());
        active.crm_page_id = Set(crm_page_id.map(|s| s.to_string()));
        active.processed_at = Set(Some(now));
        active.error_message = Set(error_message.map(|s| s.to_string()));
        active.metadata = Set(metadata);
        active.updated_at = Set(now);
        active.update(&txn).await?;

        txn.commit().await?;

        info!(signal_id = %signal_id, status = to, "processing record transitioned");
        Ok(())
    }

    /// Bulk upsert suppression entries; atomic per batch. A refresh for an
    /// existing canonical key updates the row in place.
    pub async fn update_suppression_cache(
        &self,
        entries: &[SuppressionUpsert],
    ) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin().await?;

        for entry in entries {
            let active = SuppressionActiveModel {
                id: Set(Uuid::new_v4()),
                canonical_key: Set(entry.canonical_key.clone()),
                crm_page_id: Set(entry.crm_page_id.clone()),
                status: Set(entry.status.clone()),
                company_name: Set(entry.company_name.clone()),
                cached_at: Set(entry.cached_at),
                expires_at: Set(entry.expires_at),
                metadata: Set(entry.metadata.clone()),
            };

            Suppression::insert(active)
                .on_conflict(
                    OnConflict::column(suppression_entry::Column::CanonicalKey)
                        .update_columns([
                            suppression_entry::Column::CrmPageId,
                            suppression_entry::Column::Status,
                            suppression_entry::Column::CompanyName,
                            suppression_entry::Column::CachedAt,
                            suppression_entry::Column::ExpiresAt,
                            suppression_entry::Column::Metadata,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;

        info!(count = entries.len(), "suppression cache updated");
        Ok(entries.len())
    }

    /// Active (non-expired) suppression entry for this key, if any.
    pub async fn check_suppression(
        &self,
        canonical_key: &str,
    ) -> Result<Option<SuppressionModel>, StoreError> {
        let now = Utc::now();
        let entry = Suppression::find()
            .filter(suppression_entry::Column::CanonicalKey.eq(canonical_key))
            .filter(suppression_entry::Column::ExpiresAt.gt(now))
            .one(&self.db)
            .await?;
        Ok(entry)
    }

    /// Remove expired suppression entries. Returns the count removed.
    pub async fn clean_expired_cache(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let result = Suppression::delete_many()
            .filter(suppression_entry::Column::ExpiresAt.lte(now))
            .exec(&self.db)
            .await?;
        if result.rows_affected > 0 {
            info!(count = result.rows_affected, "cleaned expired suppression entries");
        }
        Ok(result.rows_affected)
    }

    pub async fn get_stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();

        stats.total_signals = Signal::find().count(&self.db).await?;

        let by_type: Vec<(String, i64)> = Signal::find()
            .select_only()
            .column(signal::Column::SignalType)
            .column_as(Expr::col(signal::Column::Id).count(), "count")
            .group_by(signal::Column::SignalType)
            .into_tuple()
            .all(&self.db)
            .await?;
        for (signal_type, count) in by_type {
            stats.signals_by_type.insert(signal_type, count as u64);
        }

        let by_status: Vec<(String, i64)> = Processing::find()
            .select_only()
            .column(signal_processing::Column::Status)
            .column_as(Expr::col(signal_processing::Column::Id).count(), "count")
            .group_by(signal_processing::Column::Status)
            .into_tuple()
            .all(&self.db)
            .await?;
        for (status, count) in by_status {
            stats.processing_by_status.insert(status, count as u64);
        }

        let now = Utc::now();
        stats.active_suppression_entries = Suppression::find()
            .filter(suppression_entry::Column::ExpiresAt.gt(now))
            .count(&self.db)
            .await?;

        Ok(stats)
    }

    /// Record one orchestrator run's counters.
    pub async fn record_pipeline_run(&self, run: PipelineRunModel) -> Result<(), StoreError> {
        let active: PipelineRunActiveModel = run.into();
        active.insert(&self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use migration::{Migrator, MigratorTrait};

    async fn test_store() -> SignalStore {
        // One connection: pooled in-memory SQLite would otherwise hand each
        // connection its own empty database.
        let mut opt = sea_orm::ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1);
        let db = sea_orm::Database::connect(opt)
            .await
            .expect("in-memory sqlite");
        Migrator::up(&db, None).await.expect("migrations apply");
        SignalStore::new(db)
    }

    fn sample_signal(key: &str, detected_at: DateTime<Utc>) -> NewSignal {
        NewSignal {
            signal_type: SignalType::GithubSpike,
            source_api: "github_activity".to_string(),
            canonical_key: key.to_string(),
            company_name: Some("Acme".to_string()),
            confidence: 0.7,
            raw_data: serde_json::json!({"repo": "acme/acme"}),
            source_url: Some("https://api.github.com/users/acme/repos".to_string()),
            source_response_hash: None,
            detected_at,
        }
    }

    #[tokio::test]
    async fn save_creates_signal_and_pending_processing() {
        let store = test_store().await;
        let outcome = store
            .save_signal(sample_signal("domain:acme.ai", Utc::now()))
            .await
            .unwrap();
        assert!(outcome.inserted);

        let stored = store.get_signal(outcome.signal_id).await.unwrap();
        assert_eq!(stored.signal.canonical_key, "domain:acme.ai");
        assert_eq!(stored.processing_status(), Some(STATUS_PENDING));
    }

    #[tokio::test]
    async fn save_is_idempotent() {
        let store = test_store().await;
        let detected = Utc::now();

        let first = store
            .save_signal(sample_signal("domain:acme.ai", detected))
            .await
            .unwrap();
        let second = store
            .save_signal(sample_signal("domain:acme.ai", detected))
            .await
            .unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.signal_id, second.signal_id);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_signals, 1);
        assert_eq!(stats.processing_by_status.get(STATUS_PENDING), Some(&1));
    }

    #[tokio::test]
    async fn terminal_transitions_are_final() {
        let store = test_store().await;
        let outcome = store
            .save_signal(sample_signal("domain:acme.ai", Utc::now()))
            .await
            .unwrap();

        store
            .mark_pushed(outcome.signal_id, "page-123", None)
            .await
            .unwrap();

        let stored = store.get_signal(outcome.signal_id).await.unwrap();
        assert_eq!(stored.processing_status(), Some(STATUS_PUSHED));
        assert_eq!(
            stored.processing.unwrap().crm_page_id.as_deref(),
            Some("page-123")
        );

        let again = store
            .mark_rejected(outcome.signal_id, "changed our mind", None)
            .await;
        assert!(matches!(again, Err(StoreError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn pending_signals_come_back_oldest_first() {
        let store = test_store().await;
        let now = Utc::now();

        for (i, key) in ["domain:b.io", "domain:a.io", "domain:c.io"].iter().enumerate() {
            let mut new = sample_signal(key, now - Duration::days(i as i64));
            new.signal_type = SignalType::Incorporation;
            store.save_signal(new).await.unwrap();
        }

        let pending = store.get_pending_signals(None, None).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].signal.canonical_key, "domain:c.io");
        assert_eq!(pending[2].signal.canonical_key, "domain:b.io");

        let capped = store.get_pending_signals(Some(1), None).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn suppression_upsert_refreshes_in_place() {
        let store = test_store().await;
        let now = Utc::now();

        let entry = SuppressionUpsert {
            canonical_key: "domain:acme.ai".to_string(),
            crm_page_id: "page-1".to_string(),
            status: "Source".to_string(),
            company_name: Some("Acme".to_string()),
            cached_at: now,
            expires_at: now + Duration::days(7),
            metadata: None,
        };
        store.update_suppression_cache(&[entry.clone()]).await.unwrap();

        let refreshed = SuppressionUpsert {
            status: "Passed".to_string(),
            crm_page_id: "page-2".to_string(),
            ..entry
        };
        store.update_suppression_cache(&[refreshed]).await.unwrap();

        let found = store.check_suppression("domain:acme.ai").await.unwrap().unwrap();
        assert_eq!(found.status, "Passed");
        assert_eq!(found.crm_page_id, "page-2");

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.active_suppression_entries, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_cleanable() {
        let store = test_store().await;
        let now = Utc::now();

        store
            .update_suppression_cache(&[SuppressionUpsert {
                canonical_key: "domain:stale.io".to_string(),
                crm_page_id: "page-9".to_string(),
                status: "Tracking".to_string(),
                company_name: None,
                cached_at: now - Duration::days(10),
                expires_at: now - Duration::days(3),
                metadata: None,
            }])
            .await
            .unwrap();

        assert!(store.check_suppression("domain:stale.io").await.unwrap().is_none());
        assert_eq!(store.clean_expired_cache().await.unwrap(), 1);
        assert_eq!(store.clean_expired_cache().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_signal_is_not_found() {
        let store = test_store().await;
        let result = store.get_signal(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }
}
