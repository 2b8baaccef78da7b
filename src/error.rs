//! # Error Handling
//!
//! Typed errors for every concern in the pipeline, plus the mapping from a
//! failed phase to the process exit code. Recoverable conditions (duplicate
//! insert, suppression miss, retryable I/O) are modeled as values, not
//! errors, wherever a caller is expected to continue.

use thiserror::Error;

/// Errors surfaced by the signal store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lookup miss. Non-fatal for suppression checks, surfaced for get_signal.
    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Attempted illegal processing-state change.
    #[error("invalid transition: {from} -> {to} for signal {signal_id}")]
    InvalidTransition {
        signal_id: String,
        from: String,
        to: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Errors from the rate-limited HTTP layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// Retries exhausted on a retryable condition.
    #[error("transient error after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    /// Non-retryable: 4xx (other than 429), auth, malformed body.
    #[error("permanent error: {message}")]
    Permanent { message: String },

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Cooperative cancellation observed while waiting or in flight.
    #[error("cancelled")]
    Cancelled,
}

impl NetError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NetError::Transient { .. } | NetError::Timeout { .. })
    }
}

/// Errors from the canonical key service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// No candidate key derivable from the evidence bag.
    #[error("insufficient evidence to derive a canonical key")]
    InsufficientEvidence,
}

/// Errors from the CRM connector.
#[derive(Debug, Error)]
pub enum CrmError {
    /// Schema preflight failed; the report explains what is missing.
    #[error("CRM schema invalid:\n{report}")]
    SchemaInvalid { report: String },

    #[error("CRM API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("malformed CRM response: {0}")]
    Decode(String),
}

/// Errors during a collector run. Per-signal failures accumulate in the
/// result instead; these abort the whole run.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("source fetch failed: {0}")]
    Source(#[from] NetError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("collector misconfigured: {0}")]
    Config(String),

    /// The watched entity does not exist at the source (e.g. RDAP 404).
    #[error("not found at source: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,
}

/// Top-level phase errors, mapped to CLI exit codes.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    SchemaPreflight(CrmError),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// Some collectors or upserts failed but the phase completed.
    #[error("partial failure: {0}")]
    Partial(String),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Process exit code for this failure.
    ///
    /// 0 success / 1 partial / 2 config / 3 schema preflight / 4 store.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Partial(_) => 1,
            PipelineError::Config(_) => 2,
            PipelineError::SchemaPreflight(_) => 3,
            PipelineError::Store(_) => 4,
            PipelineError::Cancelled => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(PipelineError::Partial("x".into()).exit_code(), 1);
        assert_eq!(PipelineError::Config("x".into()).exit_code(), 2);
        assert_eq!(
            PipelineError::SchemaPreflight(CrmError::SchemaInvalid {
                report: "missing Canonical Key".into()
            })
            .exit_code(),
            3
        );
        assert_eq!(
            PipelineError::Store(StoreError::NotFound {
                entity: "signal",
                id: "42".into()
            })
            .exit_code(),
            4
        );
    }

    #[test]
    fn transient_classification() {
        assert!(NetError::Timeout { seconds: 10 }.is_transient());
        assert!(!NetError::Permanent {
            message: "401".into()
        }
        .is_transient());
    }
}
