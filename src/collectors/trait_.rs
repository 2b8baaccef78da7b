//! Collector trait definition
//!
//! Defines the standard contract every source collector implements, plus the
//! candidate-signal and result types the framework operates on.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::error::CollectorError;
use crate::identity::IdentityEvidence;
use crate::models::SignalType;

/// Time window a collector should look back over.
#[derive(Debug, Clone, Copy)]
pub struct LookbackWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl LookbackWindow {
    pub fn days(days: i64) -> Self {
        let until = Utc::now();
        Self {
            since: until - Duration::days(days.max(0)),
            until,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.since && at <= self.until
    }
}

/// A signal as a collector emits it, before dedup and persistence.
#[derive(Debug, Clone)]
pub struct CandidateSignal {
    pub signal_type: SignalType,
    /// The collector's own belief, 0.0..=1.0.
    pub confidence: f64,
    pub company_name: Option<String>,
    /// Partial identity the collector extracted; the framework derives the
    /// canonical key from it.
    pub evidence: IdentityEvidence,
    pub raw_data: JsonValue,
    pub source_url: Option<String>,
    pub source_response_hash: Option<String>,
    pub detected_at: DateTime<Utc>,
    /// Caveats the gate should penalize, e.g. "name collision".
    pub warning_flags: Vec<String>,
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable name; doubles as `source_api` on produced signals.
    fn name(&self) -> &'static str;

    /// Acquire any per-run resources. Default: nothing to do.
    async fn open(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }

    /// Fetch and parse a batch of candidate signals for the window.
    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError>;

    /// Release per-run resources. Default: nothing to do.
    async fn close(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }

    /// Endpoint for `prospector health` to HEAD-ping, if the source has one.
    fn ping_url(&self) -> Option<String> {
        None
    }
}

/// Terminal status of one collector run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorStatus {
    Success,
    PartialSuccess,
    DryRun,
    Error,
    NotFound,
}

/// Accounting for one collector run.
///
/// Invariant: `signals_found >= signals_new + signals_suppressed`; the
/// remainder is duplicates plus per-signal errors.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectorResult {
    pub collector: String,
    pub status: CollectorStatus,
    pub signals_found: usize,
    pub signals_new: usize,
    pub signals_suppressed: usize,
    pub signals_duplicate: usize,
    pub dry_run: bool,
    pub cancelled: bool,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CollectorResult {
    pub fn empty(collector: &str, status: CollectorStatus, dry_run: bool) -> Self {
        Self {
            collector: collector.to_string(),
            status,
            signals_found: 0,
            signals_new: 0,
            signals_suppressed: 0,
            signals_duplicate: 0,
            dry_run,
            cancelled: false,
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_bounds_are_inclusive() {
        let window = LookbackWindow::days(7);
        assert!(window.contains(window.since));
        assert!(window.contains(window.until));
        assert!(!window.contains(window.since - Duration::seconds(1)));
    }
}
