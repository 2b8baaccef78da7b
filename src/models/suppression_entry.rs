//! Suppression cache entity model
//!
//! Local mirror of one CRM record, keyed by canonical key. Entries expire by
//! TTL and are refreshed in place on every suppression sync.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "suppression_cache")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub canonical_key: String,

    pub crm_page_id: String,

    /// The CRM's literal status string for this record.
    pub status: String,

    pub company_name: Option<String>,

    pub cached_at: DateTimeUtc,
    pub expires_at: DateTimeUtc,

    pub metadata: Option<JsonValue>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
