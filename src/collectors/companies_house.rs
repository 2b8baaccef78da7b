//! UK Companies House collector
//!
//! Recent incorporations in target SIC ranges signal new early-stage
//! startups; companies moving to dissolved status produce a hard-kill
//! signal for anything else we believed about them.
//!
//! API: advanced company search with basic auth (API key as username).
//! Rate limit: 600 requests per 5 minutes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::CollectorError;
use crate::identity::IdentityEvidence;
use crate::models::SignalType;
use crate::net::SourceClient;

const API_BASE: &str = "https://api.company-information.service.gov.uk";

// Software, R&D, and health tech SIC prefixes the fund screens for.
const SIC_CODES: &str = "62012,62020,63110,72110,72190,86900";

pub struct CompaniesHouseCollector {
    client: SourceClient,
    api_key: String,
}

impl CompaniesHouseCollector {
    pub fn new(client: SourceClient, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<CompanyItem>,
}

#[derive(Debug, Deserialize)]
struct CompanyItem {
    company_name: String,
    company_number: String,
    #[serde(default)]
    company_status: String,
    date_of_creation: Option<String>,
    registered_office_address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    locality: Option<String>,
}

fn creation_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

fn parse_companies(
    response: &SearchResponse,
    window: LookbackWindow,
    response_hash: &str,
) -> Vec<CandidateSignal> {
    let mut signals = Vec::new();

    for item in &response.items {
        let Some(detected_at) = item.date_of_creation.as_deref().and_then(creation_date) else {
            continue;
        };

        let dissolved = item.company_status.eq_ignore_ascii_case("dissolved");
        if !dissolved && !window.contains(detected_at) {
            continue;
        }

        let locality = item
            .registered_office_address
            .as_ref()
            .and_then(|a| a.locality.clone());

        let mut evidence = IdentityEvidence::default()
            .companies_house_number(item.company_number.clone())
            .company_name(item.company_name.clone());
        if let Some(locality) = locality.clone() {
            evidence = evidence.region(locality);
        }

        let (signal_type, confidence, detected) = if dissolved {
            // Dissolution is reported whenever observed, not window-bound.
            (SignalType::CompanyDissolved, 0.95, Utc::now())
        } else {
            (SignalType::Incorporation, 0.9, detected_at)
        };

        signals.push(CandidateSignal {
            signal_type,
            confidence,
            company_name: Some(item.company_name.clone()),
            evidence,
            raw_data: serde_json::json!({
                "company_number": item.company_number,
                "company_status": item.company_status,
                "date_of_creation": item.date_of_creation,
                "locality": locality,
            }),
            source_url: Some(format!("{API_BASE}/company/{}", item.company_number)),
            source_response_hash: Some(response_hash.to_string()),
            detected_at: detected,
            warning_flags: Vec::new(),
        });
    }

    signals
}

#[async_trait]
impl Collector for CompaniesHouseCollector {
    fn name(&self) -> &'static str {
        "companies_house"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let url = format!(
            "{API_BASE}/advanced-search/companies?incorporated_from={}&incorporated_to={}&sic_codes={}&size=100",
            window.since.format("%Y-%m-%d"),
            window.until.format("%Y-%m-%d"),
            SIC_CODES,
        );

        let request = self.client.get(&url).basic_auth(&self.api_key, Some(""));
        let body = self.client.send(request, cancel).await?;
        let hash = body.sha256_hex();
        let response: SearchResponse = body.json()?;

        Ok(parse_companies(&response, window, &hash))
    }

    fn ping_url(&self) -> Option<String> {
        Some(format!("{API_BASE}/advanced-search/companies?size=1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(status: &str, created_days_ago: i64) -> SearchResponse {
        let date = (Utc::now() - Duration::days(created_days_ago))
            .format("%Y-%m-%d")
            .to_string();
        serde_json::from_value(serde_json::json!({
            "items": [{
                "company_name": "Novel Therapeutics Ltd",
                "company_number": "SC123456",
                "company_status": status,
                "date_of_creation": date,
                "registered_office_address": { "locality": "Edinburgh" }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn fresh_incorporation_is_a_signal() {
        let signals = parse_companies(&item("active", 3), LookbackWindow::days(7), "h");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Incorporation);
        assert_eq!(
            signals[0].evidence.companies_house_number.as_deref(),
            Some("SC123456")
        );
        assert_eq!(signals[0].evidence.region.as_deref(), Some("Edinburgh"));
    }

    #[test]
    fn old_incorporations_are_dropped() {
        let signals = parse_companies(&item("active", 60), LookbackWindow::days(7), "h");
        assert!(signals.is_empty());
    }

    #[test]
    fn dissolved_company_is_a_hard_kill_even_outside_the_window() {
        let signals = parse_companies(&item("dissolved", 400), LookbackWindow::days(7), "h");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::CompanyDissolved);
    }
}
