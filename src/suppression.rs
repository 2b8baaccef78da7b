//! Suppression sync job
//!
//! Pulls every active CRM record, derives canonical keys, and refreshes the
//! local suppression cache so collectors and the pusher never re-push a
//! prospect the fund already knows about. Entries expire by TTL; each sync
//! refreshes them in place and sweeps the expired ones.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::crm::{CrmConnector, CrmRecord};
use crate::error::PipelineError;
use crate::identity::{self, CanonicalKey, IdentityEvidence};
use crate::store::{SignalStore, SuppressionUpsert};

/// Statistics from one suppression sync run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncStats {
    pub pages_fetched: usize,
    pub entries_processed: usize,
    pub entries_with_strong_key: usize,
    pub entries_with_weak_key: usize,
    pub entries_without_key: usize,
    pub entries_synced: usize,
    pub expired_cleaned: u64,
    pub dry_run: bool,
    pub duration_seconds: f64,
    pub errors: Vec<String>,
}

pub struct SuppressionSync {
    store: SignalStore,
    connector: Arc<CrmConnector>,
    ttl: Duration,
}

impl SuppressionSync {
    pub fn new(store: SignalStore, connector: Arc<CrmConnector>, ttl_days: i64) -> Self {
        Self {
            store,
            connector,
            ttl: Duration::days(ttl_days.max(1)),
        }
    }

    /// Run one sync. In dry-run the CRM is read and keys derived, but the
    /// cache is untouched.
    #[instrument(skip_all, fields(dry_run))]
    pub async fn run(&self, dry_run: bool) -> Result<SyncStats, PipelineError> {
        let started = Utc::now();
        let mut stats = SyncStats {
            dry_run,
            ..SyncStats::default()
        };

        let records = self
            .connector
            .get_suppression_list()
            .await
            .map_err(|e| PipelineError::Partial(format!("suppression list fetch failed: {e}")))?;
        stats.pages_fetched = records.len();

        let now = Utc::now();
        let mut entries = Vec::new();

        for record in &records {
            stats.entries_processed += 1;
            match derive_key(record) {
                Some(key) => {
                    if key.is_strong() {
                        stats.entries_with_strong_key += 1;
                    } else {
                        stats.entries_with_weak_key += 1;
                    }
                    entries.push(to_entry(record, &key, now, self.ttl));
                }
                None => {
                    stats.entries_without_key += 1;
                    warn!(
                        page_id = %record.page_id,
                        company = %record.company_name,
                        "CRM record has no derivable canonical key"
                    );
                }
            }
        }

        if !dry_run {
            stats.entries_synced = self.store.update_suppression_cache(&entries).await?;
            stats.expired_cleaned = self.store.clean_expired_cache().await?;
        }

        stats.duration_seconds =
            (Utc::now() - started).num_milliseconds().max(0) as f64 / 1000.0;
        info!(
            fetched = stats.pages_fetched,
            synced = stats.entries_synced,
            strong = stats.entries_with_strong_key,
            weak = stats.entries_with_weak_key,
            keyless = stats.entries_without_key,
            cleaned = stats.expired_cleaned,
            "suppression sync complete"
        );
        Ok(stats)
    }
}

/// Canonical key for one CRM record: trust the stored key when it parses,
/// otherwise derive from website and company name.
fn derive_key(record: &CrmRecord) -> Option<CanonicalKey> {
    if let Some(stored) = record.canonical_key.as_deref() {
        if let Some(key) = CanonicalKey::parse(stored) {
            return Some(key);
        }
    }

    let mut evidence = IdentityEvidence::default();
    if let Some(website) = record.website.clone() {
        evidence = evidence.website(website);
    }
    if !record.company_name.is_empty() {
        evidence = evidence.company_name(record.company_name.clone());
    }
    identity::primary_key(&evidence).ok()
}

fn to_entry(
    record: &CrmRecord,
    key: &CanonicalKey,
    now: DateTime<Utc>,
    ttl: Duration,
) -> SuppressionUpsert {
    SuppressionUpsert {
        canonical_key: key.as_str().to_string(),
        crm_page_id: record.page_id.clone(),
        status: record.status.clone(),
        company_name: if record.company_name.is_empty() {
            None
        } else {
            Some(record.company_name.clone())
        },
        cached_at: now,
        expires_at: now + ttl,
        metadata: record
            .discovery_id
            .as_ref()
            .map(|id| serde_json::json!({ "discovery_id": id })),
    }
}
