//! Pipeline run entity model
//!
//! One row per orchestrator run, recording phase counters for operator
//! inspection.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "pipeline_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub run_id: String,

    pub started_at: DateTimeUtc,
    pub completed_at: Option<DateTimeUtc>,
    pub duration_seconds: Option<f64>,

    pub collectors_run: i32,
    pub collectors_failed: i32,
    pub signals_found: i32,
    pub signals_new: i32,
    pub signals_suppressed: i32,

    pub prospects_created: i32,
    pub prospects_updated: i32,
    pub prospects_skipped: i32,

    pub suppression_synced: i32,

    pub errors: Option<JsonValue>,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
