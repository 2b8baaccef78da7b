//! Job postings collector
//!
//! Hiring is the strongest validation signal: the company exists, has money,
//! and is growing. Checks the Greenhouse and Lever hosted-board APIs for a
//! slug derived from each watched domain; boards that do not exist are
//! skipped quietly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::{CollectorError, NetError};
use crate::identity::IdentityEvidence;
use crate::models::SignalType;
use crate::net::SourceClient;

const GREENHOUSE_BASE: &str = "https://boards-api.greenhouse.io/v1/boards";
const LEVER_BASE: &str = "https://api.lever.co/v0/postings";

pub struct JobPostingsCollector {
    client: SourceClient,
    watch_domains: Vec<String>,
}

impl JobPostingsCollector {
    pub fn new(client: SourceClient, watch_domains: Vec<String>) -> Self {
        Self {
            client,
            watch_domains,
        }
    }
}

/// ATS board slugs are almost always the bare company label: `acme.ai` →
/// `acme`.
fn board_slug(domain: &str) -> Option<String> {
    let label = domain.split('.').next()?.trim().to_ascii_lowercase();
    if label.len() < 2 {
        None
    } else {
        Some(label)
    }
}

#[derive(Debug, Deserialize)]
struct GreenhouseBoard {
    #[serde(default)]
    jobs: Vec<GreenhouseJob>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseJob {
    title: String,
    updated_at: DateTime<Utc>,
    absolute_url: String,
}

#[derive(Debug, Deserialize)]
struct LeverPosting {
    text: String,
    #[serde(rename = "createdAt")]
    created_at_ms: i64,
    #[serde(rename = "hostedUrl")]
    hosted_url: String,
}

fn hiring_signal(
    domain: &str,
    board: &str,
    roles: &[(String, String)],
    newest: DateTime<Utc>,
    response_hash: &str,
) -> CandidateSignal {
    // More open roles, more conviction; capped below the gate ceiling.
    let confidence = (0.7 + 0.02 * roles.len() as f64).min(0.9);
    let sample_url = roles.first().map(|(_, url)| url.clone());

    CandidateSignal {
        signal_type: SignalType::JobPosting,
        confidence,
        company_name: None,
        evidence: IdentityEvidence::default().website(domain),
        raw_data: serde_json::json!({
            "domain": domain,
            "board": board,
            "open_roles": roles.len(),
            "titles": roles.iter().map(|(title, _)| title).collect::<Vec<_>>(),
        }),
        source_url: sample_url,
        source_response_hash: Some(response_hash.to_string()),
        detected_at: newest,
        warning_flags: Vec::new(),
    }
}

fn is_not_found(err: &NetError) -> bool {
    matches!(err, NetError::Permanent { message } if message.contains("404"))
}

#[async_trait]
impl Collector for JobPostingsCollector {
    fn name(&self) -> &'static str {
        "job_postings"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let mut signals = Vec::new();

        for domain in &self.watch_domains {
            if cancel.is_cancelled() {
                return Err(CollectorError::Cancelled);
            }
            let Some(slug) = board_slug(domain) else {
                continue;
            };

            // Greenhouse first, Lever as fallback.
            let greenhouse_url = format!("{GREENHOUSE_BASE}/{slug}/jobs");
            match self.client.send(self.client.get(&greenhouse_url), cancel).await {
                Ok(body) => {
                    let hash = body.sha256_hex();
                    let board: GreenhouseBoard = body.json()?;
                    let fresh: Vec<(String, String)> = board
                        .jobs
                        .iter()
                        .filter(|j| window.contains(j.updated_at))
                        .map(|j| (j.title.clone(), j.absolute_url.clone()))
                        .collect();
                    let newest = board
                        .jobs
                        .iter()
                        .filter(|j| window.contains(j.updated_at))
                        .map(|j| j.updated_at)
                        .max();
                    if let Some(newest) = newest {
                        signals.push(hiring_signal(domain, "greenhouse", &fresh, newest, &hash));
                    }
                    continue;
                }
                Err(err) if is_not_found(&err) => {
                    debug!(domain = %domain, "no greenhouse board");
                }
                Err(err) => return Err(err.into()),
            }

            let lever_url = format!("{LEVER_BASE}/{slug}?mode=json");
            match self.client.send(self.client.get(&lever_url), cancel).await {
                Ok(body) => {
                    let hash = body.sha256_hex();
                    let postings: Vec<LeverPosting> = body.json()?;
                    let mut fresh: Vec<(String, String)> = Vec::new();
                    let mut newest: Option<DateTime<Utc>> = None;
                    for posting in &postings {
                        let Some(at) = DateTime::<Utc>::from_timestamp_millis(posting.created_at_ms)
                        else {
                            continue;
                        };
                        if !window.contains(at) {
                            continue;
                        }
                        fresh.push((posting.text.clone(), posting.hosted_url.clone()));
                        newest = Some(newest.map_or(at, |n: DateTime<Utc>| n.max(at)));
                    }
                    if let Some(newest) = newest {
                        signals.push(hiring_signal(domain, "lever", &fresh, newest, &hash));
                    }
                }
                Err(err) if is_not_found(&err) => {
                    debug!(domain = %domain, "no lever board");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(signals)
    }

    fn ping_url(&self) -> Option<String> {
        Some(format!("{GREENHOUSE_BASE}/greenhouse/jobs"))
    }
}
