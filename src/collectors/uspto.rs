//! USPTO patent collector
//!
//! Patent grants via the PatentsView search API. Patent activity indicates
//! R&D investment and a potential IP moat; it usually precedes
//! commercialization.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::CollectorError;
use crate::identity::IdentityEvidence;
use crate::models::SignalType;
use crate::net::SourceClient;

const API_URL: &str = "https://search.patentsview.org/api/v1/patent/";

pub struct UsptoCollector {
    client: SourceClient,
}

impl UsptoCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    patents: Vec<Patent>,
}

#[derive(Debug, Deserialize)]
struct Patent {
    patent_id: String,
    patent_title: String,
    patent_date: String,
    #[serde(default)]
    assignees: Vec<Assignee>,
}

#[derive(Debug, Deserialize)]
struct Assignee {
    assignee_organization: Option<String>,
}

fn patent_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

fn patent_signal(
    patent: &Patent,
    window: LookbackWindow,
    response_hash: &str,
) -> Option<CandidateSignal> {
    let detected_at = patent_date(&patent.patent_date)?;
    if !window.contains(detected_at) {
        return None;
    }

    let organization = patent
        .assignees
        .iter()
        .find_map(|a| a.assignee_organization.clone())?;

    Some(CandidateSignal {
        signal_type: SignalType::PatentFiling,
        confidence: 0.6,
        company_name: Some(organization.clone()),
        evidence: IdentityEvidence::default().company_name(organization),
        raw_data: serde_json::json!({
            "patent_id": patent.patent_id,
            "title": patent.patent_title,
            "patent_date": patent.patent_date,
        }),
        source_url: Some(format!("https://patents.google.com/patent/US{}", patent.patent_id)),
        source_response_hash: Some(response_hash.to_string()),
        detected_at,
        warning_flags: Vec::new(),
    })
}

#[async_trait]
impl Collector for UsptoCollector {
    fn name(&self) -> &'static str {
        "uspto"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let query = serde_json::json!({
            "q": { "_gte": { "patent_date": window.since.format("%Y-%m-%d").to_string() } },
            "f": ["patent_id", "patent_title", "patent_date", "assignees.assignee_organization"],
            "o": { "size": 100 },
        });

        let request = self.client.post(API_URL).json(&query);
        let body = self.client.send(request, cancel).await?;
        let hash = body.sha256_hex();
        let response: SearchResponse = body.json()?;

        Ok(response
            .patents
            .iter()
            .filter_map(|patent| patent_signal(patent, window, &hash))
            .collect())
    }

    fn ping_url(&self) -> Option<String> {
        Some(API_URL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn patent(days_ago: i64, organization: Option<&str>) -> Patent {
        let date = (Utc::now() - Duration::days(days_ago))
            .format("%Y-%m-%d")
            .to_string();
        serde_json::from_value(serde_json::json!({
            "patent_id": "12345678",
            "patent_title": "Method for autonomous swarm coordination",
            "patent_date": date,
            "assignees": [{ "assignee_organization": organization }],
        }))
        .unwrap()
    }

    #[test]
    fn recent_patent_with_assignee_is_a_signal() {
        let signal =
            patent_signal(&patent(3, Some("Acme Robotics Inc")), LookbackWindow::days(7), "h")
                .unwrap();
        assert_eq!(signal.signal_type, SignalType::PatentFiling);
        assert_eq!(signal.company_name.as_deref(), Some("Acme Robotics Inc"));
    }

    #[test]
    fn individual_inventors_without_organization_are_skipped() {
        assert!(patent_signal(&patent(3, None), LookbackWindow::days(7), "h").is_none());
    }

    #[test]
    fn old_patents_are_dropped() {
        assert!(
            patent_signal(&patent(60, Some("Acme Inc")), LookbackWindow::days(7), "h").is_none()
        );
    }
}
