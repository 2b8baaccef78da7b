//! CRM connector.
//!
//! Validated, rate-limited client for the fund's Notion pipeline database.
//! Every write runs schema preflight first; records in a terminal status are
//! never overwritten. The wire transport sits behind a trait so tests can
//! script responses without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::CrmConfig;
use crate::crm::schema::{
    self, SchemaContract, ValidationReport, PROP_CANONICAL_KEY, PROP_COMPANY_NAME,
    PROP_CONFIDENCE_SCORE, PROP_DISCOVERY_ID, PROP_INVESTMENT_STAGE, PROP_SIGNAL_TYPES,
    PROP_STATUS, PROP_WEBSITE, PROP_WHY_NOW,
};
use crate::error::CrmError;
use crate::net::SourceClient;

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

/// Wire operations the connector needs from the CRM API.
#[async_trait]
pub trait CrmTransport: Send + Sync {
    /// Retrieve the database object (schema lives in `properties`).
    async fn get_database(&self) -> Result<JsonValue, CrmError>;

    /// Query database pages with a filter; one page of results.
    async fn query_database(
        &self,
        filter: JsonValue,
        start_cursor: Option<String>,
    ) -> Result<JsonValue, CrmError>;

    async fn create_page(&self, properties: JsonValue) -> Result<JsonValue, CrmError>;

    async fn update_page(
        &self,
        page_id: &str,
        properties: JsonValue,
    ) -> Result<JsonValue, CrmError>;
}

/// Production transport over the rate-limited HTTP client.
pub struct HttpTransport {
    client: SourceClient,
    api_base: String,
    api_key: String,
    database_id: String,
    cancel: CancellationToken,
}

impl HttpTransport {
    pub fn new(
        client: SourceClient,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        database_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
            database_id: database_id.into(),
            cancel,
        }
    }

    fn decorate(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
    }
}

#[async_trait]
impl CrmTransport for HttpTransport {
    async fn get_database(&self) -> Result<JsonValue, CrmError> {
        let url = format!("{}/databases/{}", self.api_base, self.database_id);
        let response = self
            .client
            .send(self.decorate(self.client.get(&url)), &self.cancel)
            .await?;
        response.json().map_err(CrmError::from)
    }

    async fn query_database(
        &self,
        filter: JsonValue,
        start_cursor: Option<String>,
    ) -> Result<JsonValue, CrmError> {
        let url = format!("{}/databases/{}/query", self.api_base, self.database_id);
        let mut body = json!({ "filter": filter, "page_size": PAGE_SIZE });
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = json!(cursor);
        }
        let response = self
            .client
            .send(self.decorate(self.client.post(&url)).json(&body), &self.cancel)
            .await?;
        response.json().map_err(CrmError::from)
    }

    async fn create_page(&self, properties: JsonValue) -> Result<JsonValue, CrmError> {
        let url = format!("{}/pages", self.api_base);
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": properties,
        });
        let response = self
            .client
            .send(self.decorate(self.client.post(&url)).json(&body), &self.cancel)
            .await?;
        response.json().map_err(CrmError::from)
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: JsonValue,
    ) -> Result<JsonValue, CrmError> {
        let url = format!("{}/pages/{}", self.api_base, page_id);
        let body = json!({ "properties": properties });
        let response = self
            .client
            .send(self.decorate(self.client.patch(&url)).json(&body), &self.cancel)
            .await?;
        response.json().map_err(CrmError::from)
    }
}

/// One CRM record as seen from the suppression sync.
#[derive(Debug, Clone)]
pub struct CrmRecord {
    pub page_id: String,
    pub status: String,
    pub company_name: String,
    pub canonical_key: Option<String>,
    pub discovery_id: Option<String>,
    pub website: Option<String>,
}

/// Payload for one prospect upsert.
#[derive(Debug, Clone)]
pub struct ProspectPayload {
    pub discovery_id: String,
    pub company_name: String,
    pub canonical_key: String,
    /// All candidate keys, strongest first, for multi-key matching.
    pub canonical_key_candidates: Vec<String>,
    pub website: Option<String>,
    /// The routing status from the gate.
    pub status: String,
    pub stage: String,
    pub confidence_score: f64,
    pub signal_types: Vec<String>,
    pub why_now: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub page_id: String,
    pub action: UpsertAction,
    pub reason: String,
}

struct SchemaCache {
    fetched_at: Instant,
    report: ValidationReport,
}

/// Validated client over a [`CrmTransport`].
pub struct CrmConnector {
    transport: Arc<dyn CrmTransport>,
    contract: SchemaContract,
    suppress_statuses: Vec<String>,
    terminal_statuses: Vec<String>,
    schema_cache_ttl: Duration,
    schema_cache: Mutex<Option<SchemaCache>>,
}

impl CrmConnector {
    pub fn new(transport: Arc<dyn CrmTransport>, config: &CrmConfig) -> Self {
        Self {
            transport,
            contract: SchemaContract::from_config(config),
            suppress_statuses: config.suppress_statuses(),
            terminal_statuses: config.terminal_statuses.clone(),
            schema_cache_ttl: Duration::from_secs(config.schema_cache_ttl_hours * 3600),
            schema_cache: Mutex::new(None),
        }
    }

    /// Compare the live schema against the contract. Cached with TTL.
    #[instrument(skip(self))]
    pub async fn validate_schema(&self, force_refresh: bool) -> Result<ValidationReport, CrmError> {
        let mut cache = self.schema_cache.lock().await;
        if !force_refresh {
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.schema_cache_ttl {
                    return Ok(cached.report.clone());
                }
            }
        }

        let database = self.transport.get_database().await?;
        let properties = database
            .get("properties")
            .cloned()
            .unwrap_or(JsonValue::Null);
        let report = schema::validate(&self.contract, &properties);

        if report.is_valid() {
            debug!("schema validation passed");
        } else {
            info!(%report, "schema validation failed");
        }

        *cache = Some(SchemaCache {
            fetched_at: Instant::now(),
            report: report.clone(),
        });
        Ok(report)
    }

    fn preflight(&self, report: &ValidationReport) -> Result<(), CrmError> {
        if report.is_valid() {
            Ok(())
        } else {
            Err(CrmError::SchemaInvalid {
                report: report.to_string(),
            })
        }
    }

    /// Every active CRM record, across all suppress statuses. Paginates
    /// internally.
    #[instrument(skip(self))]
    pub async fn get_suppression_list(&self) -> Result<Vec<CrmRecord>, CrmError> {
        let filter = json!({
            "or": self
                .suppress_statuses
                .iter()
                .map(|status| json!({ "property": PROP_STATUS, "select": { "equals": status } }))
                .collect::<Vec<_>>()
        });

        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .transport
                .query_database(filter.clone(), cursor.clone())
                .await?;

            let results = page
                .get("results")
                .and_then(|r| r.as_array())
                .ok_or_else(|| CrmError::Decode("query response missing results".to_string()))?;

            for result in results {
                if let Some(record) = parse_record(result) {
                    records.push(record);
                }
            }

            let has_more = page.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false);
            if !has_more {
                break;
            }
            cursor = page
                .get("next_cursor")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if cursor.is_none() {
                break;
            }
        }

        info!(count = records.len(), "fetched CRM suppression list");
        Ok(records)
    }

    /// Create or update one prospect.
    ///
    /// Runs strict schema preflight before touching anything. Match order:
    /// discovery id, then each canonical key candidate, then website. A match
    /// whose status is terminal is skipped, never overwritten.
    #[instrument(skip(self, payload), fields(company = %payload.company_name))]
    pub async fn upsert_prospect(
        &self,
        payload: &ProspectPayload,
    ) -> Result<UpsertOutcome, CrmError> {
        let report = self.validate_schema(false).await?;
        self.preflight(&report)?;

        let existing = self.find_existing(payload).await?;

        match existing {
            Some(record) if self.terminal_statuses.contains(&record.status) => {
                debug!(page_id = %record.page_id, status = %record.status, "terminal record, skipping");
                Ok(UpsertOutcome {
                    page_id: record.page_id,
                    action: UpsertAction::Skipped,
                    reason: format!("terminal status {:?} is never overwritten", record.status),
                })
            }
            Some(record) => {
                self.transport
                    .update_page(&record.page_id, build_update_properties(payload))
                    .await?;
                Ok(UpsertOutcome {
                    page_id: record.page_id,
                    action: UpsertAction::Updated,
                    reason: format!("matched existing record ({})", record.status),
                })
            }
            None => {
                let created = self
                    .transport
                    .create_page(build_create_properties(payload))
                    .await?;
                let page_id = created
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| CrmError::Decode("created page missing id".to_string()))?
                    .to_string();
                Ok(UpsertOutcome {
                    page_id,
                    action: UpsertAction::Created,
                    reason: "new prospect".to_string(),
                })
            }
        }
    }

    async fn find_existing(
        &self,
        payload: &ProspectPayload,
    ) -> Result<Option<CrmRecord>, CrmError> {
        if !payload.discovery_id.is_empty() {
            let filter = json!({
                "property": PROP_DISCOVERY_ID,
                "rich_text": { "equals": payload.discovery_id }
            });
            if let Some(record) = self.query_one(filter).await? {
                return Ok(Some(record));
            }
        }

        let mut candidates = payload.canonical_key_candidates.clone();
        if candidates.is_empty() && !payload.canonical_key.is_empty() {
            candidates.push(payload.canonical_key.clone());
        }
        for candidate in candidates {
            let filter = json!({
                "property": PROP_CANONICAL_KEY,
                "rich_text": { "equals": candidate }
            });
            if let Some(record) = self.query_one(filter).await? {
                return Ok(Some(record));
            }
        }

        if let Some(website) = payload.website.as_deref() {
            if let Some(domain) = crate::identity::normalize_domain(website) {
                let filter = json!({
                    "property": PROP_WEBSITE,
                    "url": { "contains": domain }
                });
                if let Some(record) = self.query_one(filter).await? {
                    return Ok(Some(record));
                }
            }
        }

        Ok(None)
    }

    async fn query_one(&self, filter: JsonValue) -> Result<Option<CrmRecord>, CrmError> {
        let page = self.transport.query_database(filter, None).await?;
        let record = page
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|results| results.first())
            .and_then(parse_record);
        Ok(record)
    }
}

fn parse_record(page: &JsonValue) -> Option<CrmRecord> {
    let page_id = page.get("id")?.as_str()?.to_string();
    let props = page.get("properties")?;

    Some(CrmRecord {
        page_id,
        status: extract_select(props.get(PROP_STATUS)).unwrap_or_default(),
        company_name: extract_title(props.get(PROP_COMPANY_NAME)),
        canonical_key: extract_rich_text(props.get(PROP_CANONICAL_KEY)),
        discovery_id: extract_rich_text(props.get(PROP_DISCOVERY_ID)),
        website: props
            .get(PROP_WEBSITE)
            .and_then(|p| p.get("url"))
            .and_then(|u| u.as_str())
            .map(|s| s.to_string()),
    })
}

fn extract_select(prop: Option<&JsonValue>) -> Option<String> {
    prop?
        .get("select")?
        .get("name")?
        .as_str()
        .map(|s| s.to_string())
}

fn extract_title(prop: Option<&JsonValue>) -> String {
    prop.and_then(|p| p.get("title"))
        .and_then(|t| t.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("plain_text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn extract_rich_text(prop: Option<&JsonValue>) -> Option<String> {
    let text: String = prop?
        .get("rich_text")?
        .as_array()?
        .iter()
        .filter_map(|p| p.get("plain_text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn rich_text_value(content: &str) -> JsonValue {
    json!({ "rich_text": [{ "text": { "content": content } }] })
}

fn build_create_properties(payload: &ProspectPayload) -> JsonValue {
    let mut props = build_update_properties(payload);
    props[PROP_COMPANY_NAME] = json!({
        "title": [{ "text": { "content": payload.company_name } }]
    });
    if let Some(website) = payload.website.as_deref() {
        props[PROP_WEBSITE] = json!({ "url": website });
    }
    props
}

fn build_update_properties(payload: &ProspectPayload) -> JsonValue {
    json!({
        PROP_STATUS: { "select": { "name": payload.status } },
        PROP_INVESTMENT_STAGE: { "select": { "name": payload.stage } },
        PROP_DISCOVERY_ID: rich_text_value(&payload.discovery_id),
        PROP_CANONICAL_KEY: rich_text_value(&payload.canonical_key),
        PROP_CONFIDENCE_SCORE: { "number": (payload.confidence_score * 1000.0).round() / 1000.0 },
        PROP_SIGNAL_TYPES: {
            "multi_select": payload
                .signal_types
                .iter()
                .map(|t| json!({ "name": t }))
                .collect::<Vec<_>>()
        },
        PROP_WHY_NOW: rich_text_value(&payload.why_now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// Scripted transport: records calls, returns canned responses.
    struct ScriptedTransport {
        pub database: JsonValue,
        pub query_results: StdMutex<Vec<JsonValue>>,
        pub calls: StdMutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(database: JsonValue) -> Self {
            Self {
                database,
                query_results: StdMutex::new(Vec::new()),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl CrmTransport for ScriptedTransport {
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
            Ok(json!({ "id": "page-created" }))
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

    fn valid_database() -> JsonValue {
        let config = AppConfig::default().crm;
        let contract = SchemaContract::from_config(&config);
        let mut props = serde_json::Map::new();
        for (name, kind) in contract.required.iter().chain(contract.optional.iter()) {
            let body = match kind {
                crate::crm::PropertyKind::Select => {
                    let options: Vec<_> = if *name == PROP_STATUS {
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

    fn broken_database() -> JsonValue {
        let mut db = valid_database();
        db["properties"].as_object_mut().unwrap().remove(PROP_CANONICAL_KEY);
        db
    }

    fn payload() -> ProspectPayload {
        ProspectPayload {
            discovery_id: "disc_domain_acme_ai".to_string(),
            company_name: "Acme".to_string(),
            canonical_key: "domain:acme.ai".to_string(),
            canonical_key_candidates: vec!["domain:acme.ai".to_string()],
            website: Some("https://acme.ai".to_string()),
            status: "Source".to_string(),
            stage: "Pre-Seed".to_string(),
            confidence_score: 0.81,
            signal_types: vec!["incorporation".to_string(), "github_spike".to_string()],
            why_now: "2 sources corroborate".to_string(),
        }
    }

    #[tokio::test]
    async fn preflight_blocks_writes_on_invalid_schema() {
        let transport = Arc::new(ScriptedTransport::new(broken_database()));
        let connector = CrmConnector::new(transport.clone(), &AppConfig::default().crm);

        let result = connector.upsert_prospect(&payload()).await;
        assert!(matches!(result, Err(CrmError::SchemaInvalid { .. })));

        // The only transport traffic was the schema fetch; no write happened.
        let calls = transport.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["get_database"]);
    }

    #[tokio::test]
    async fn creates_when_no_match() {
        let transport = Arc::new(ScriptedTransport::new(valid_database()));
        let connector = CrmConnector::new(transport.clone(), &AppConfig::default().crm);

        let outcome = connector.upsert_prospect(&payload()).await.unwrap();
        assert_eq!(outcome.action, UpsertAction::Created);
        assert_eq!(outcome.page_id, "page-created");
        assert!(transport
            .calls
            .lock()
            .unwrap()
            .contains(&"create_page".to_string()));
    }

    #[tokio::test]
    async fn terminal_status_is_never_overwritten() {
        let transport = Arc::new(ScriptedTransport::new(valid_database()));
        transport.query_results.lock().unwrap().push(json!({
            "results": [{
                "id": "page-passed",
                "properties": {
                    PROP_STATUS: { "select": { "name": "Passed" } },
                    PROP_COMPANY_NAME: { "title": [{ "plain_text": "Acme" }] },
                    PROP_CANONICAL_KEY: { "rich_text": [{ "plain_text": "domain:acme.ai" }] }
                }
            }],
            "has_more": false
        }));

        let connector = CrmConnector::new(transport.clone(), &AppConfig::default().crm);
        let outcome = connector.upsert_prospect(&payload()).await.unwrap();

        assert_eq!(outcome.action, UpsertAction::Skipped);
        assert_eq!(outcome.page_id, "page-passed");
        let calls = transport.calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c.starts_with("update_page")));
        assert!(!calls.contains(&"create_page".to_string()));
    }

    #[tokio::test]
    async fn in_pipeline_match_is_updated() {
        let transport = Arc::new(ScriptedTransport::new(valid_database()));
        transport.query_results.lock().unwrap().push(json!({
            "results": [{
                "id": "page-tracking",
                "properties": {
                    PROP_STATUS: { "select": { "name": "Tracking" } },
                    PROP_COMPANY_NAME: { "title": [{ "plain_text": "Acme" }] }
                }
            }],
            "has_more": false
        }));

        let connector = CrmConnector::new(transport.clone(), &AppConfig::default().crm);
        let outcome = connector.upsert_prospect(&payload()).await.unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        assert_eq!(outcome.page_id, "page-tracking");
    }

    #[tokio::test]
    async fn suppression_list_paginates() {
        let transport = Arc::new(ScriptedTransport::new(valid_database()));
        {
            let mut queue = transport.query_results.lock().unwrap();
            queue.push(json!({
                "results": [{
                    "id": "page-1",
                    "properties": {
                        PROP_STATUS: { "select": { "name": "Source" } },
                        PROP_COMPANY_NAME: { "title": [{ "plain_text": "One" }] }
                    }
                }],
                "has_more": true,
                "next_cursor": "cursor-2"
            }));
            queue.push(json!({
                "results": [{
                    "id": "page-2",
                    "properties": {
                        PROP_STATUS: { "select": { "name": "Passed" } },
                        PROP_COMPANY_NAME: { "title": [{ "plain_text": "Two" }] }
                    }
                }],
                "has_more": false
            }));
        }

        let connector = CrmConnector::new(transport, &AppConfig::default().crm);
        let records = connector.get_suppression_list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].page_id, "page-1");
        assert_eq!(records[1].status, "Passed");
    }

    #[tokio::test]
    async fn schema_cache_avoids_refetch() {
        let transport = Arc::new(ScriptedTransport::new(valid_database()));
        let connector = CrmConnector::new(transport.clone(), &AppConfig::default().crm);

        connector.validate_schema(false).await.unwrap();
        connector.validate_schema(false).await.unwrap();
        let fetches = transport
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == "get_database")
            .count();
        assert_eq!(fetches, 1);

        connector.validate_schema(true).await.unwrap();
        let fetches = transport
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == "get_database")
            .count();
        assert_eq!(fetches, 2);
    }
}
