//! Collector framework
//!
//! Wraps concrete collectors with the behavior every source shares: canonical
//! key derivation, suppression checks, dedup against the store, per-signal
//! error isolation, dry-run accounting, and cooperative cancellation.

use std::collections::HashSet;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::collectors::trait_::{
    CandidateSignal, Collector, CollectorResult, CollectorStatus, LookbackWindow,
};
use crate::error::CollectorError;
use crate::identity;
use crate::store::{NewSignal, SignalStore};

/// Run one collector against the store.
///
/// Per candidate signal: derive the canonical key, consult the suppression
/// cache, consult the dedup index, then persist. One bad record never aborts
/// the batch. In dry-run the checks run for accurate accounting but nothing
/// is written.
#[instrument(skip_all, fields(collector = collector.name(), dry_run))]
pub async fn run_collector(
    collector: &mut dyn Collector,
    store: &SignalStore,
    window: LookbackWindow,
    dry_run: bool,
    cancel: &CancellationToken,
) -> CollectorResult {
    let name = collector.name();

    if let Err(err) = collector.open().await {
        warn!(collector = name, error = %err, "collector open failed");
        let mut result = CollectorResult::empty(name, CollectorStatus::Error, dry_run);
        result.errors.push(err.to_string());
        return result;
    }

    let candidates = match collector.collect(window, cancel).await {
        Ok(candidates) => candidates,
        Err(err) => {
            let status = match &err {
                CollectorError::NotFound(_) => CollectorStatus::NotFound,
                CollectorError::Cancelled => CollectorStatus::PartialSuccess,
                _ => CollectorStatus::Error,
            };
            let mut result = CollectorResult::empty(name, status, dry_run);
            result.cancelled = matches!(err, CollectorError::Cancelled);
            if !result.cancelled {
                result.errors.push(err.to_string());
            }
            let _ = collector.close().await;
            return result;
        }
    };

    let mut result = CollectorResult::empty(name, CollectorStatus::Success, dry_run);
    let mut seen_this_run: HashSet<String> = HashSet::new();

    for candidate in candidates {
        if cancel.is_cancelled() {
            result.cancelled = true;
            break;
        }

        result.signals_found += 1;

        let key = match identity::key_candidates(&candidate.evidence) {
            Ok(candidates) => candidates,
            Err(err) => {
                result
                    .errors
                    .push(format!("{}: {err}", candidate.signal_type));
                continue;
            }
        };
        let primary = key[0].as_str().to_string();

        // Within one run, only the first signal per key counts.
        if !seen_this_run.insert(primary.clone()) {
            result.signals_duplicate += 1;
            continue;
        }

        match store.check_suppression(&primary).await {
            Ok(Some(entry)) => {
                debug!(
                    canonical_key = %primary,
                    crm_page = %entry.crm_page_id,
                    "suppressed: already in CRM"
                );
                result.signals_suppressed += 1;
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                result.errors.push(format!("{primary}: {err}"));
                continue;
            }
        }

        match store.is_duplicate(&primary).await {
            Ok(true) => {
                result.signals_duplicate += 1;
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                result.errors.push(format!("{primary}: {err}"));
                continue;
            }
        }

        if dry_run {
            result.signals_new += 1;
            continue;
        }

        match store.save_signal(to_new_signal(name, &primary, &key, candidate)).await {
            Ok(outcome) if outcome.inserted => result.signals_new += 1,
            Ok(_) => result.signals_duplicate += 1,
            Err(err) => result.errors.push(format!("{primary}: {err}")),
        }
    }

    if let Err(err) = collector.close().await {
        warn!(collector = name, error = %err, "collector close failed");
    }

    result.status = if dry_run && !result.cancelled && result.errors.is_empty() {
        CollectorStatus::DryRun
    } else if result.cancelled || !result.errors.is_empty() {
        CollectorStatus::PartialSuccess
    } else {
        CollectorStatus::Success
    };

    info!(
        collector = name,
        found = result.signals_found,
        new = result.signals_new,
        suppressed = result.signals_suppressed,
        duplicate = result.signals_duplicate,
        errors = result.errors.len(),
        cancelled = result.cancelled,
        "collector run complete"
    );

    result
}

fn to_new_signal(
    source_api: &str,
    primary_key: &str,
    all_candidates: &[identity::CanonicalKey],
    candidate: CandidateSignal,
) -> NewSignal {
    // Key candidates and warning flags ride along in raw_data so the pusher
    // and the gate can read them back without re-deriving evidence.
    let mut raw_data = candidate.raw_data;
    if let Some(map) = raw_data.as_object_mut() {
        map.insert(
            "canonical_key_candidates".to_string(),
            json!(all_candidates
                .iter()
                .map(|k| k.as_str().to_string())
                .collect::<Vec<_>>()),
        );
        if !candidate.warning_flags.is_empty() {
            map.insert("warning_flags".to_string(), json!(candidate.warning_flags));
        }
    }

    NewSignal {
        signal_type: candidate.signal_type,
        source_api: source_api.to_string(),
        canonical_key: primary_key.to_string(),
        company_name: candidate.company_name,
        confidence: candidate.confidence,
        raw_data,
        source_url: candidate.source_url,
        source_response_hash: candidate.source_response_hash,
        detected_at: candidate.detected_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityEvidence;
    use crate::models::SignalType;
    use async_trait::async_trait;
    use chrono::Utc;
    use migration::{Migrator, MigratorTrait};

    struct FixedCollector {
        signals: Vec<CandidateSignal>,
    }

    #[async_trait]
    impl Collector for FixedCollector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn collect(
            &self,
            _window: LookbackWindow,
            _cancel: &CancellationToken,
        ) -> Result<Vec<CandidateSignal>, CollectorError> {
            Ok(self.signals.clone())
        }
    }

    async fn test_store() -> SignalStore {
        let mut opt = sea_orm::ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1);
        let db = sea_orm::Database::connect(opt).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        SignalStore::new(db)
    }

    fn candidate(domain: &str) -> CandidateSignal {
        CandidateSignal {
            signal_type: SignalType::DomainRegistration,
            confidence: 0.6,
            company_name: None,
            evidence: IdentityEvidence::default().website(domain),
            raw_data: serde_json::json!({"domain": domain}),
            source_url: None,
            source_response_hash: None,
            detected_at: Utc::now(),
            warning_flags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn empty_run_is_success_with_zero_counters() {
        let store = test_store().await;
        let mut collector = FixedCollector { signals: vec![] };
        let result = run_collector(
            &mut collector,
            &store,
            LookbackWindow::days(7),
            false,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.status, CollectorStatus::Success);
        assert_eq!(result.signals_found, 0);
        assert_eq!(result.signals_new, 0);
        assert_eq!(result.signals_suppressed, 0);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn rerun_skips_duplicates_without_counting_them_suppressed() {
        let store = test_store().await;
        let signals = vec![candidate("acme.ai"), candidate("other.io")];

        let mut collector = FixedCollector {
            signals: signals.clone(),
        };
        let first = run_collector(
            &mut collector,
            &store,
            LookbackWindow::days(7),
            false,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(first.signals_new, 2);
        assert_eq!(first.signals_suppressed, 0);

        let mut collector = FixedCollector { signals };
        let second = run_collector(
            &mut collector,
            &store,
            LookbackWindow::days(7),
            false,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(second.signals_new, 0);
        assert_eq!(second.signals_suppressed, 0);
        assert_eq!(second.signals_duplicate, 2);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_signals, 2);
    }

    #[tokio::test]
    async fn suppressed_keys_are_not_saved() {
        let store = test_store().await;
        let now = Utc::now();
        store
            .update_suppression_cache(&[crate::store::SuppressionUpsert {
                canonical_key: "domain:acme.ai".to_string(),
                crm_page_id: "page-1".to_string(),
                status: "Passed".to_string(),
                company_name: None,
                cached_at: now,
                expires_at: now + chrono::Duration::days(7),
                metadata: None,
            }])
            .await
            .unwrap();

        let mut collector = FixedCollector {
            signals: vec![candidate("acme.ai")],
        };
        let result = run_collector(
            &mut collector,
            &store,
            LookbackWindow::days(7),
            false,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.signals_suppressed, 1);
        assert_eq!(result.signals_new, 0);
        assert!(!store.is_duplicate("domain:acme.ai").await.unwrap());
    }

    #[tokio::test]
    async fn missing_evidence_counts_as_error_and_does_not_persist() {
        let store = test_store().await;
        let mut no_evidence = candidate("acme.ai");
        no_evidence.evidence = IdentityEvidence::default();

        let mut collector = FixedCollector {
            signals: vec![no_evidence, candidate("real.io")],
        };
        let result = run_collector(
            &mut collector,
            &store,
            LookbackWindow::days(7),
            false,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.status, CollectorStatus::PartialSuccess);
        assert_eq!(result.signals_found, 2);
        assert_eq!(result.signals_new, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(
            result.signals_found >= result.signals_new + result.signals_suppressed,
            "accounting identity violated"
        );
    }

    #[tokio::test]
    async fn dry_run_checks_but_does_not_write() {
        let store = test_store().await;
        let mut collector = FixedCollector {
            signals: vec![candidate("acme.ai")],
        };
        let result = run_collector(
            &mut collector,
            &store,
            LookbackWindow::days(7),
            true,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.status, CollectorStatus::DryRun);
        assert_eq!(result.signals_new, 1);
        assert_eq!(store.get_stats().await.unwrap().total_signals, 0);
    }

    #[tokio::test]
    async fn cancellation_returns_partial_result() {
        let store = test_store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut collector = FixedCollector {
            signals: vec![candidate("acme.ai"), candidate("two.io")],
        };
        let result = run_collector(
            &mut collector,
            &store,
            LookbackWindow::days(7),
            false,
            &cancel,
        )
        .await;

        assert!(result.cancelled);
        assert_eq!(result.status, CollectorStatus::PartialSuccess);
        assert_eq!(result.signals_new, 0);
    }

    #[tokio::test]
    async fn same_key_twice_in_one_batch_counts_once() {
        let store = test_store().await;
        let mut collector = FixedCollector {
            signals: vec![candidate("acme.ai"), candidate("www.acme.ai")],
        };
        let result = run_collector(
            &mut collector,
            &store,
            LookbackWindow::days(7),
            false,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.signals_new, 1);
        assert_eq!(result.signals_duplicate, 1);
    }
}
