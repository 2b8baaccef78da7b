//! Processing record entity model
//!
//! Created atomically with its signal, starts `pending`. The only legal
//! transitions are `pending -> pushed` and `pending -> rejected`; the store
//! enforces this.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Routing outcome for a signal.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PUSHED: &str = "pushed";
pub const STATUS_REJECTED: &str = "rejected";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "signal_processing")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub signal_id: Uuid,

    /// `pending`, `pushed` or `rejected`.
    pub status: String,

    /// CRM page the signal landed on, set on push.
    pub crm_page_id: Option<String>,

    pub processed_at: Option<DateTimeUtc>,

    pub error_message: Option<String>,

    /// Decision-time audit: confidence breakdown, decision kind.
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::signal::Entity",
        from = "Column::SignalId",
        to = "super::signal::Column::Id"
    )]
    Signal,
}

impl Related<super::signal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Signal.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
