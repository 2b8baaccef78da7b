//! CRM batch processor
//!
//! Reads pending signals, groups them by canonical key into prospects, runs
//! the verification gate, and routes: auto-push and needs-review prospects
//! are upserted into the CRM and their signals marked pushed; rejects are
//! marked rejected; holds stay pending for the next batch. One prospect's
//! failure never aborts the batch; an invalid CRM schema aborts immediately.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::crm::{CrmConnector, ProspectPayload, UpsertAction};
use crate::error::{CrmError, PipelineError};
use crate::gate::{Decision, GateSignal, VerificationGate};
use crate::models::SignalType;
use crate::store::{SignalStore, StoredSignal};

/// Aggregation of all pending signals sharing one canonical key.
#[derive(Debug)]
pub struct Prospect {
    pub canonical_key: String,
    pub signals: Vec<StoredSignal>,
    pub signal_types: Vec<String>,
    pub source_apis: Vec<String>,
    /// Union of raw payloads; on conflicting keys the latest signal wins.
    pub merged_raw: JsonValue,
    pub earliest_detected: DateTime<Utc>,
    pub latest_detected: DateTime<Utc>,
}

impl Prospect {
    pub fn is_multi_source(&self) -> bool {
        self.source_apis.len() >= 2
    }
}

/// Group pending signals by canonical key. Signals arrive oldest first, so
/// later entries overwrite earlier ones in the merged payload.
pub fn group_prospects(pending: Vec<StoredSignal>) -> Vec<Prospect> {
    let mut by_key: BTreeMap<String, Vec<StoredSignal>> = BTreeMap::new();
    for stored in pending {
        by_key
            .entry(stored.signal.canonical_key.clone())
            .or_default()
            .push(stored);
    }

    by_key
        .into_iter()
        .map(|(canonical_key, mut signals)| {
            signals.sort_by_key(|s| s.signal.detected_at);

            let mut signal_types = Vec::new();
            let mut source_apis = Vec::new();
            let mut merged = serde_json::Map::new();

            for stored in &signals {
                if !signal_types.contains(&stored.signal.signal_type) {
                    signal_types.push(stored.signal.signal_type.clone());
                }
                if !source_apis.contains(&stored.signal.source_api) {
                    source_apis.push(stored.signal.source_api.clone());
                }
                if let Some(map) = stored.signal.raw_data.as_object() {
                    for (k, v) in map {
                        merged.insert(k.clone(), v.clone());
                    }
                }
            }

            let earliest = signals.first().map(|s| s.signal.detected_at).unwrap_or_else(Utc::now);
            let latest = signals.last().map(|s| s.signal.detected_at).unwrap_or_else(Utc::now);

            Prospect {
                canonical_key,
                signal_types,
                source_apis,
                merged_raw: JsonValue::Object(merged),
                earliest_detected: earliest,
                latest_detected: latest,
                signals,
            }
        })
        .collect()
}

/// Counters for one pusher batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub cancelled: bool,

    pub signals_retrieved: usize,
    pub prospects_evaluated: usize,

    pub auto_push: usize,
    pub needs_review: usize,
    pub held: usize,
    pub rejected: usize,

    pub prospects_created: usize,
    pub prospects_updated: usize,
    pub prospects_skipped: usize,

    pub error_messages: Vec<String>,
}

impl BatchResult {
    fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            dry_run,
            cancelled: false,
            signals_retrieved: 0,
            prospects_evaluated: 0,
            auto_push: 0,
            needs_review: 0,
            held: 0,
            rejected: 0,
            prospects_created: 0,
            prospects_updated: 0,
            prospects_skipped: 0,
            error_messages: Vec::new(),
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn has_errors(&self) -> bool {
        !self.error_messages.is_empty()
    }
}

/// Batch processor pushing qualified prospects into the CRM.
pub struct CrmPusher {
    store: SignalStore,
    connector: Arc<CrmConnector>,
    gate: VerificationGate,
    /// Covers gate + upsert + mark for one prospect.
    prospect_timeout: Duration,
}

impl CrmPusher {
    pub fn new(store: SignalStore, connector: Arc<CrmConnector>, gate: VerificationGate) -> Self {
        Self {
            store,
            connector,
            gate,
            prospect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_prospect_timeout(mut self, timeout: Duration) -> Self {
        self.prospect_timeout = timeout;
        self
    }

    /// Process one batch of pending signals.
    ///
    /// In dry-run the gate and payload synthesis run for a counter-factual
    /// report, but neither the CRM nor the store is touched.
    #[instrument(skip_all, fields(limit, dry_run))]
    pub async fn process_batch(
        &self,
        limit: Option<u64>,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, PipelineError> {
        let mut result = BatchResult::new(dry_run);

        let pending = self.store.get_pending_signals(limit, None).await?;
        result.signals_retrieved = pending.len();

        if pending.is_empty() {
            result.completed_at = Some(Utc::now());
            info!("no pending signals to process");
            return Ok(result);
        }

        let prospects = group_prospects(pending);
        result.prospects_evaluated = prospects.len();
        info!(
            signals = result.signals_retrieved,
            prospects = result.prospects_evaluated,
            "processing batch"
        );

        for prospect in prospects {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let outcome = tokio::time::timeout(
                self.prospect_timeout,
                self.process_prospect(&prospect, dry_run, &mut result),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {}
                // Schema preflight failure is fatal to the phase.
                Ok(Err(ProspectError::SchemaInvalid(err))) => {
                    result.completed_at = Some(Utc::now());
                    return Err(PipelineError::SchemaPreflight(err));
                }
                Ok(Err(ProspectError::Other(message))) => {
                    warn!(canonical_key = %prospect.canonical_key, error = %message, "prospect failed");
                    result
                        .error_messages
                        .push(format!("{}: {message}", prospect.canonical_key));
                }
                Err(_) => {
                    result.error_messages.push(format!(
                        "{}: timed out after {}s",
                        prospect.canonical_key,
                        self.prospect_timeout.as_secs()
                    ));
                }
            }
        }

        result.completed_at = Some(Utc::now());
        info!(
            auto_push = result.auto_push,
            needs_review = result.needs_review,
            held = result.held,
            rejected = result.rejected,
            created = result.prospects_created,
            updated = result.prospects_updated,
            skipped = result.prospects_skipped,
            errors = result.error_messages.len(),
            cancelled = result.cancelled,
            "batch complete"
        );
        Ok(result)
    }

    async fn process_prospect(
        &self,
        prospect: &Prospect,
        dry_run: bool,
        result: &mut BatchResult,
    ) -> Result<(), ProspectError> {
        let gate_signals = to_gate_signals(&prospect.signals);
        let outcome = self.gate.evaluate(&gate_signals, Utc::now());

        match outcome.decision {
            Decision::AutoPush => result.auto_push += 1,
            Decision::NeedsReview => result.needs_review += 1,
            Decision::Hold => {
                result.held += 1;
                debug!(canonical_key = %prospect.canonical_key, "hold, signals stay pending");
                return Ok(());
            }
            Decision::Reject => {
                result.rejected += 1;
                if !dry_run {
                    let metadata = outcome.metadata();
                    for stored in &prospect.signals {
                        self.store
                            .mark_rejected(stored.signal.id, &outcome.reason, Some(metadata.clone()))
                            .await
                            .map_err(|e| ProspectError::Other(e.to_string()))?;
                    }
                }
                return Ok(());
            }
        }

        if dry_run {
            debug!(
                canonical_key = %prospect.canonical_key,
                decision = ?outcome.decision,
                confidence = outcome.confidence,
                "dry run, not pushing"
            );
            return Ok(());
        }

        let payload = build_payload(prospect, &outcome);
        let upsert = match self.connector.upsert_prospect(&payload).await {
            Ok(upsert) => upsert,
            Err(err @ CrmError::SchemaInvalid { .. }) => {
                return Err(ProspectError::SchemaInvalid(err));
            }
            // Failed upsert leaves the signals pending for the next batch.
            Err(err) => return Err(ProspectError::Other(err.to_string())),
        };

        match upsert.action {
            UpsertAction::Created => result.prospects_created += 1,
            UpsertAction::Updated => result.prospects_updated += 1,
            UpsertAction::Skipped => result.prospects_skipped += 1,
        }

        let mut metadata = outcome.metadata();
        metadata["crm_action"] = serde_json::json!(format!("{:?}", upsert.action));
        for stored in &prospect.signals {
            self.store
                .mark_pushed(stored.signal.id, &upsert.page_id, Some(metadata.clone()))
                .await
                .map_err(|e| ProspectError::Other(e.to_string()))?;
        }

        Ok(())
    }
}

enum ProspectError {
    SchemaInvalid(CrmError),
    Other(String),
}

fn to_gate_signals(signals: &[StoredSignal]) -> Vec<GateSignal> {
    signals
        .iter()
        .filter_map(|stored| {
            let signal_type: SignalType = stored.signal.signal_type.parse().ok()?;
            let warning_flags = stored
                .signal
                .raw_data
                .get("warning_flags")
                .and_then(|f| f.as_array())
                .map(|flags| {
                    flags
                        .iter()
                        .filter_map(|f| f.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();

            Some(GateSignal {
                id: stored.signal.id.to_string(),
                signal_type,
                source_api: stored.signal.source_api.clone(),
                confidence: stored.signal.confidence,
                detected_at: stored.signal.detected_at,
                warning_flags,
            })
        })
        .collect()
}

/// Stable discovery id for one canonical key.
pub fn discovery_id(canonical_key: &str) -> String {
    format!("disc_{}", canonical_key.replace([':', '.', '/'], "_"))
}

fn build_payload(prospect: &Prospect, outcome: &crate::gate::GateOutcome) -> ProspectPayload {
    // Company name: latest signal that carries one, else the key's value part.
    let company_name = prospect
        .signals
        .iter()
        .rev()
        .find_map(|s| s.signal.company_name.clone())
        .unwrap_or_else(|| {
            prospect
                .canonical_key
                .split_once(':')
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| prospect.canonical_key.clone())
        });

    let website = prospect
        .merged_raw
        .get("website")
        .or_else(|| prospect.merged_raw.get("domain"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            prospect
                .canonical_key
                .strip_prefix("domain:")
                .map(|d| format!("https://{d}"))
        });

    let canonical_key_candidates = prospect
        .merged_raw
        .get("canonical_key_candidates")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![prospect.canonical_key.clone()]);

    let stage = if prospect
        .signal_types
        .iter()
        .any(|t| t == SignalType::FundingEvent.as_str())
    {
        "Seed".to_string()
    } else {
        "Pre-Seed".to_string()
    };

    let why_now = format!(
        "{} signal type(s) from {} source(s) ({}); confidence {:.2}; latest signal {}",
        prospect.signal_types.len(),
        prospect.source_apis.len(),
        prospect.source_apis.join(", "),
        outcome.confidence,
        prospect.latest_detected.format("%Y-%m-%d"),
    );

    ProspectPayload {
        discovery_id: discovery_id(&prospect.canonical_key),
        company_name,
        canonical_key: prospect.canonical_key.clone(),
        canonical_key_candidates,
        website,
        status: outcome
            .suggested_status
            .clone()
            .unwrap_or_else(|| "Source".to_string()),
        stage,
        confidence_score: outcome.confidence,
        signal_types: prospect.signal_types.clone(),
        why_now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::Model as SignalModel;
    use chrono::Duration;
    use uuid::Uuid;

    fn stored(
        key: &str,
        signal_type: &str,
        source: &str,
        days_ago: i64,
        raw: JsonValue,
    ) -> StoredSignal {
        let at = Utc::now() - Duration::days(days_ago);
        StoredSignal {
            signal: SignalModel {
                id: Uuid::new_v4(),
                signal_type: signal_type.to_string(),
                source_api: source.to_string(),
                canonical_key: key.to_string(),
                company_name: Some("Acme".to_string()),
                confidence: 0.8,
                raw_data: raw,
                source_url: None,
                source_response_hash: None,
                detected_at: at,
                created_at: at,
            },
            processing: None,
        }
    }

    #[test]
    fn grouping_unions_types_and_sources() {
        let pending = vec![
            stored("domain:acme.ai", "github_spike", "github_activity", 2,
                serde_json::json!({"repo": "acme/acme", "shared": "old"})),
            stored("domain:acme.ai", "incorporation", "companies_house", 1,
                serde_json::json!({"company_number": "123", "shared": "new"})),
            stored("domain:other.io", "hn_mention", "hacker_news", 3,
                serde_json::json!({})),
        ];

        let prospects = group_prospects(pending);
        assert_eq!(prospects.len(), 2);

        let acme = prospects
            .iter()
            .find(|p| p.canonical_key == "domain:acme.ai")
            .unwrap();
        assert_eq!(acme.signal_types, vec!["github_spike", "incorporation"]);
        assert!(acme.is_multi_source());
        // Latest signal wins on conflicting keys.
        assert_eq!(acme.merged_raw["shared"], "new");
        assert!(acme.earliest_detected < acme.latest_detected);
    }

    #[test]
    fn discovery_id_is_deterministic_and_filesystem_safe() {
        assert_eq!(discovery_id("domain:acme.ai"), "disc_domain_acme_ai");
        assert_eq!(
            discovery_id("github_repo:acme/robot"),
            "disc_github_repo_acme_robot"
        );
        assert_eq!(discovery_id("domain:acme.ai"), discovery_id("domain:acme.ai"));
    }

    #[test]
    fn payload_synthesis_fills_all_routing_fields() {
        let pending = vec![
            stored("domain:acme.ai", "funding_event", "crunchbase", 1,
                serde_json::json!({
                    "canonical_key_candidates": ["domain:acme.ai", "crunchbase:acme"],
                    "website": "https://acme.ai"
                })),
        ];
        let prospects = group_prospects(pending);
        let gate = VerificationGate::default();
        let outcome = gate.evaluate(&to_gate_signals(&prospects[0].signals), Utc::now());

        let payload = build_payload(&prospects[0], &outcome);
        assert_eq!(payload.discovery_id, "disc_domain_acme_ai");
        assert_eq!(payload.company_name, "Acme");
        assert_eq!(payload.stage, "Seed");
        assert_eq!(
            payload.canonical_key_candidates,
            vec!["domain:acme.ai", "crunchbase:acme"]
        );
        assert!(payload.why_now.contains("crunchbase"));
        assert!(payload.why_now.contains("confidence"));
    }

    #[test]
    fn unknown_signal_types_are_skipped_by_the_gate_conversion() {
        let pending = vec![stored(
            "domain:acme.ai",
            "mystery_event",
            "somewhere",
            1,
            serde_json::json!({}),
        )];
        let prospects = group_prospects(pending);
        assert!(to_gate_signals(&prospects[0].signals).is_empty());
    }
}
