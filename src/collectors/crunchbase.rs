//! Crunchbase collector
//!
//! Recently announced funding rounds via the Crunchbase search API. Funding
//! events carry a stable organization permalink, which makes a strong
//! canonical key.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::CollectorError;
use crate::identity::IdentityEvidence;
use crate::models::SignalType;
use crate::net::SourceClient;

const API_URL: &str = "https://api.crunchbase.com/api/v4/searches/funding_rounds";

pub struct CrunchbaseCollector {
    client: SourceClient,
    api_key: String,
}

impl CrunchbaseCollector {
    pub fn new(client: SourceClient, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct Entity {
    uuid: String,
    properties: RoundProperties,
}

#[derive(Debug, Deserialize)]
struct RoundProperties {
    announced_on: Option<String>,
    investment_type: Option<String>,
    funded_organization_identifier: Option<OrgIdentifier>,
    money_raised: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct OrgIdentifier {
    value: Option<String>,
    permalink: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Money {
    value_usd: Option<f64>,
}

fn announced_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

// Rounds beyond this size belong to later-stage funds.
const MAX_ROUND_USD: f64 = 20_000_000.0;

fn round_signal(
    entity: &Entity,
    window: LookbackWindow,
    response_hash: &str,
) -> Option<CandidateSignal> {
    let announced = entity
        .properties
        .announced_on
        .as_deref()
        .and_then(announced_date)?;
    if !window.contains(announced) {
        return None;
    }

    let org = entity.properties.funded_organization_identifier.as_ref()?;
    let permalink = org.permalink.clone()?;
    let company_name = org.value.clone();

    let raised_usd = entity
        .properties
        .money_raised
        .as_ref()
        .and_then(|m| m.value_usd);
    if matches!(raised_usd, Some(usd) if usd > MAX_ROUND_USD) {
        return None;
    }

    let mut evidence = IdentityEvidence::default().crunchbase_id(permalink.clone());
    if let Some(name) = company_name.clone() {
        evidence = evidence.company_name(name);
    }

    Some(CandidateSignal {
        signal_type: SignalType::FundingEvent,
        confidence: 0.8,
        company_name,
        evidence,
        raw_data: serde_json::json!({
            "round_uuid": entity.uuid,
            "investment_type": entity.properties.investment_type,
            "announced_on": entity.properties.announced_on,
            "money_raised_usd": raised_usd,
            "crunchbase_permalink": permalink,
        }),
        source_url: Some(format!("https://www.crunchbase.com/organization/{permalink}")),
        source_response_hash: Some(response_hash.to_string()),
        detected_at: announced,
        warning_flags: Vec::new(),
    })
}

#[async_trait]
impl Collector for CrunchbaseCollector {
    fn name(&self) -> &'static str {
        "crunchbase"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let query = serde_json::json!({
            "field_ids": [
                "announced_on",
                "investment_type",
                "funded_organization_identifier",
                "money_raised"
            ],
            "query": [{
                "type": "predicate",
                "field_id": "announced_on",
                "operator_id": "gte",
                "values": [window.since.format("%Y-%m-%d").to_string()]
            }],
            "limit": 100
        });

        let request = self
            .client
            .post(API_URL)
            .header("X-cb-user-key", &self.api_key)
            .json(&query);
        let body = self.client.send(request, cancel).await?;
        let hash = body.sha256_hex();
        let response: SearchResponse = body.json()?;

        Ok(response
            .entities
            .iter()
            .filter_map(|entity| round_signal(entity, window, &hash))
            .collect())
    }

    fn ping_url(&self) -> Option<String> {
        Some(API_URL.to_string())
    }
}
