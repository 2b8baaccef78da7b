//! SEC EDGAR Form D collector
//!
//! Form D filings are exempt-offering notices: a strong early fundraising
//! signal, often before any public announcement. Uses the EDGAR full-text
//! search API filtered to form type D within the lookback window.
//!
//! Rate limit: 10 requests/second per SEC fair-access policy.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::CollectorError;
use crate::identity::IdentityEvidence;
use crate::models::SignalType;
use crate::net::SourceClient;

const SEARCH_URL: &str = "https://efts.sec.gov/LATEST/search-index";

pub struct SecEdgarCollector {
    client: SourceClient,
}

impl SecEdgarCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: HitSource,
}

#[derive(Debug, Deserialize)]
struct HitSource {
    #[serde(default)]
    display_names: Vec<String>,
    file_date: String,
    #[serde(default)]
    ciks: Vec<String>,
}

/// `display_names` entries look like `"Acme Robotics Inc (CIK 0001234567)"`.
fn company_name_from_display(display: &str) -> String {
    match display.rsplit_once(" (CIK") {
        Some((name, _)) => name.trim().to_string(),
        None => display.trim().to_string(),
    }
}

fn filing_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

fn parse_filings(
    response: &SearchResponse,
    window: LookbackWindow,
    response_hash: &str,
) -> Vec<CandidateSignal> {
    let mut signals = Vec::new();

    for hit in &response.hits.hits {
        let Some(display) = hit.source.display_names.first() else {
            continue;
        };
        let Some(detected_at) = filing_date(&hit.source.file_date) else {
            continue;
        };
        if !window.contains(detected_at) {
            continue;
        }

        let company_name = company_name_from_display(display);
        let evidence = IdentityEvidence::default().company_name(company_name.clone());

        signals.push(CandidateSignal {
            signal_type: SignalType::FundingEvent,
            confidence: 0.75,
            company_name: Some(company_name),
            evidence,
            raw_data: serde_json::json!({
                "filing_id": hit.id,
                "form_type": "D",
                "ciks": hit.source.ciks,
                "file_date": hit.source.file_date,
            }),
            source_url: Some(format!(
                "https://www.sec.gov/cgi-bin/browse-edgar?action=getcompany&filenum={}",
                hit.id
            )),
            source_response_hash: Some(response_hash.to_string()),
            detected_at,
            warning_flags: Vec::new(),
        });
    }

    signals
}

#[async_trait]
impl Collector for SecEdgarCollector {
    fn name(&self) -> &'static str {
        "sec_edgar"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let url = format!(
            "{}?q=%22Form%20D%22&forms=D&dateRange=custom&startdt={}&enddt={}",
            SEARCH_URL,
            window.since.format("%Y-%m-%d"),
            window.until.format("%Y-%m-%d"),
        );

        let body = self.client.send(self.client.get(&url), cancel).await?;
        let hash = body.sha256_hex();
        let response: SearchResponse = body.json()?;

        Ok(parse_filings(&response, window, &hash))
    }

    fn ping_url(&self) -> Option<String> {
        Some("https://efts.sec.gov/LATEST/search-index?q=test".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn response(file_date: &str) -> SearchResponse {
        serde_json::from_value(serde_json::json!({
            "hits": { "hits": [{
                "_id": "0001234567-25-000123",
                "_source": {
                    "display_names": ["Acme Robotics Inc (CIK 0001234567)"],
                    "file_date": file_date,
                    "ciks": ["0001234567"]
                }
            }]}
        }))
        .unwrap()
    }

    #[test]
    fn parses_form_d_into_funding_event() {
        let window = LookbackWindow::days(7);
        let date = (Utc::now() - Duration::days(2)).format("%Y-%m-%d").to_string();
        let signals = parse_filings(&response(&date), window, "hash");

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.signal_type, SignalType::FundingEvent);
        assert_eq!(signal.company_name.as_deref(), Some("Acme Robotics Inc"));
        assert_eq!(signal.source_response_hash.as_deref(), Some("hash"));
        assert_eq!(
            signal.evidence.company_name.as_deref(),
            Some("Acme Robotics Inc")
        );
    }

    #[test]
    fn filings_outside_the_window_are_dropped() {
        let window = LookbackWindow::days(7);
        let stale = (Utc::now() - Duration::days(30)).format("%Y-%m-%d").to_string();
        assert!(parse_filings(&response(&stale), window, "hash").is_empty());
    }

    #[test]
    fn display_name_strips_cik_suffix() {
        assert_eq!(
            company_name_from_display("Acme Robotics Inc (CIK 0001234567)"),
            "Acme Robotics Inc"
        );
        assert_eq!(company_name_from_display("Bare Name LLC"), "Bare Name LLC");
    }
}
