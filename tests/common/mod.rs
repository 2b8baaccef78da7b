//! Shared helpers for integration tests: an in-memory store and a scripted
//! CRM transport.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use serde_json::{json, Value as JsonValue};

use prospector::config::AppConfig;
use prospector::crm::{CrmTransport, PropertyKind, SchemaContract};
use prospector::error::CrmError;
use prospector::models::SignalType;
use prospector::store::{NewSignal, SignalStore};

pub async fn memory_store() -> SignalStore {
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

pub fn new_signal(
    key: &str,
    signal_type: SignalType,
    source_api: &str,
    confidence: f64,
    detected_at: DateTime<Utc>,
) -> NewSignal {
    NewSignal {
        signal_type,
        source_api: source_api.to_string(),
        canonical_key: key.to_string(),
        company_name: Some("Foo Robotics".to_string()),
        confidence,
        raw_data: json!({ "website": "https://foo.io" }),
        source_url: None,
        source_response_hash: None,
        detected_at,
    }
}

/// A CRM database object whose schema satisfies the default contract.
pub fn valid_database() -> JsonValue {
    database_from_contract(&SchemaContract::from_config(&AppConfig::default().crm))
}

/// Same, but with the "Canonical Key" property missing.
pub fn broken_database() -> JsonValue {
    let mut db = valid_database();
    db["properties"]
        .as_object_mut()
        .unwrap()
        .remove("Canonical Key");
    db
}

fn database_from_contract(contract: &SchemaContract) -> JsonValue {
    let mut props = serde_json::Map::new();
    for (name, kind) in contract.required.iter().chain(contract.optional.iter()) {
        let body = match kind {
            PropertyKind::Select => {
                let options: Vec<_> = if *name == "Status" {
                    contract
                        .status_options
                        .iter()
                        .map(|s| json!({ "name": s }))
                        .collect()
                } else {
                    contract
                        .stage_options
                        .iter()
                        .map(|s| json!({ "name": s }))
                        .collect()
                };
                json!({ "type": "select", "select": { "options": options } })
            }
            other => json!({ "type": other.as_str() }),
        };
        props.insert(name.to_string(), body);
    }
    json!({ "properties": props })
}

/// Scripted CRM transport: canned database schema, queued query responses,
/// and a log of every call.
pub struct ScriptedCrm {
    pub database: JsonValue,
    pub query_results: Mutex<Vec<JsonValue>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedCrm {
    pub fn new(database: JsonValue) -> Self {
        Self {
            database,
            query_results: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_query_result(&self, result: JsonValue) {
        self.query_results.lock().unwrap().push(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c == "create_page" || c.starts_with("update_page"))
            .collect()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl CrmTransport for ScriptedCrm {
    async fn get_database(&self) -> Result<JsonValue, CrmError> {
        self.record("get_database");
        Ok(self.database.clone())
    }

    async fn query_database(
        &self,
        _filter: JsonValue,
        _start_cursor: Option<String>,
    ) -> Result<JsonValue, CrmError> {
        self.record("query_database");
        let mut queue = self.query_results.lock().unwrap();
        if queue.is_empty() {
            Ok(json!({ "results": [], "has_more": false }))
        } else {
            Ok(queue.remove(0))
        }
    }

    async fn create_page(&self, _properties: JsonValue) -> Result<JsonValue, CrmError> {
        self.record("create_page");
        Ok(json!({ "id": "page-created-1" }))
    }

    async fn update_page(
        &self,
        page_id: &str,
        _properties: JsonValue,
    ) -> Result<JsonValue, CrmError> {
        self.record(&format!("update_page:{page_id}"));
        Ok(json!({ "id": page_id }))
    }
}

/// A CRM page row as returned inside query results.
pub fn crm_page(page_id: &str, status: &str, name: &str, canonical_key: Option<&str>) -> JsonValue {
    let mut properties = json!({
        "Status": { "select": { "name": status } },
        "Company Name": { "title": [{ "plain_text": name }] },
    });
    if let Some(key) = canonical_key {
        properties["Canonical Key"] = json!({ "rich_text": [{ "plain_text": key }] });
    }
    json!({ "id": page_id, "properties": properties })
}
