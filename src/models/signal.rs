//! Signal entity model
//!
//! One row per observed event from an external source. Signals are
//! append-only: collectors create them and nothing in the pipeline mutates
//! them afterwards. Provenance (source URL, response hash) travels with the
//! row.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "signals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Canonical event kind, see [`crate::models::SignalType`].
    pub signal_type: String,

    /// Name of the collector that produced this signal.
    pub source_api: String,

    /// Deduplication identity for the company, e.g. `domain:acme.ai`.
    pub canonical_key: String,

    pub company_name: Option<String>,

    /// The collector's own belief in the signal, 0.0..=1.0.
    pub confidence: f64,

    /// Source-specific payload. Consumers must not assume fields beyond what
    /// the producing collector documents.
    pub raw_data: JsonValue,

    pub source_url: Option<String>,

    /// SHA-256 of the source response body, for audit.
    pub source_response_hash: Option<String>,

    /// When the event happened at the source.
    pub detected_at: DateTimeUtc,

    /// When we ingested it.
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::signal_processing::Entity")]
    Processing,
}

impl Related<super::signal_processing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Processing.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
