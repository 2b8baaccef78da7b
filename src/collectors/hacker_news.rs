//! Hacker News collector
//!
//! Community traction via the Algolia HN search API (no auth). `Show HN`
//! stories are treated as product launches; other front-page mentions as
//! weaker community-interest signals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::CollectorError;
use crate::identity::{self, IdentityEvidence};
use crate::models::SignalType;
use crate::net::SourceClient;

const API_BASE: &str = "https://hn.algolia.com/api/v1";
const MIN_POINTS: u32 = 20;

// Aggregators and hosts that never identify the company itself.
const EXCLUDED_DOMAINS: &[&str] = &[
    "github.com",
    "twitter.com",
    "x.com",
    "youtube.com",
    "medium.com",
    "substack.com",
    "arxiv.org",
    "wikipedia.org",
];

pub struct HackerNewsCollector {
    client: SourceClient,
}

impl HackerNewsCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<StoryHit>,
}

#[derive(Debug, Deserialize)]
struct StoryHit {
    #[serde(rename = "objectID")]
    object_id: String,
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    points: u32,
    #[serde(default)]
    num_comments: u32,
    created_at_i: i64,
}

fn story_signal(hit: &StoryHit, response_hash: &str) -> Option<CandidateSignal> {
    let title = hit.title.as_deref()?;
    let url = hit.url.as_deref()?;
    if hit.points < MIN_POINTS {
        return None;
    }

    let domain = identity::normalize_domain(url)?;
    if EXCLUDED_DOMAINS.contains(&domain.as_str()) {
        return None;
    }

    let detected_at = DateTime::<Utc>::from_timestamp(hit.created_at_i, 0)?;
    let is_show_hn = title.to_ascii_lowercase().starts_with("show hn");

    let (signal_type, confidence) = if is_show_hn {
        (SignalType::ProductLaunch, 0.6)
    } else {
        (SignalType::HnMention, 0.45)
    };

    Some(CandidateSignal {
        signal_type,
        confidence,
        company_name: None,
        evidence: IdentityEvidence::default().website(url),
        raw_data: serde_json::json!({
            "title": title,
            "url": url,
            "points": hit.points,
            "num_comments": hit.num_comments,
            "show_hn": is_show_hn,
        }),
        source_url: Some(format!("https://news.ycombinator.com/item?id={}", hit.object_id)),
        source_response_hash: Some(response_hash.to_string()),
        detected_at,
        warning_flags: Vec::new(),
    })
}

#[async_trait]
impl Collector for HackerNewsCollector {
    fn name(&self) -> &'static str {
        "hacker_news"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let url = format!(
            "{API_BASE}/search_by_date?tags=story&numericFilters=created_at_i>{},points>{}",
            window.since.timestamp(),
            MIN_POINTS - 1,
        );

        let body = self.client.send(self.client.get(&url), cancel).await?;
        let hash = body.sha256_hex();
        let response: SearchResponse = body.json()?;

        Ok(response
            .hits
            .iter()
            .filter_map(|hit| story_signal(hit, &hash))
            .collect())
    }

    fn ping_url(&self) -> Option<String> {
        Some(format!("{API_BASE}/search?query=test&hitsPerPage=1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, url: &str, points: u32) -> StoryHit {
        serde_json::from_value(serde_json::json!({
            "objectID": "4242",
            "title": title,
            "url": url,
            "points": points,
            "num_comments": 10,
            "created_at_i": Utc::now().timestamp(),
        }))
        .unwrap()
    }

    #[test]
    fn show_hn_is_a_product_launch() {
        let signal =
            story_signal(&hit("Show HN: Acme – robots as a service", "https://acme.ai", 90), "h")
                .unwrap();
        assert_eq!(signal.signal_type, SignalType::ProductLaunch);
        assert_eq!(signal.evidence.website.as_deref(), Some("https://acme.ai"));
    }

    #[test]
    fn plain_story_is_a_mention() {
        let signal = story_signal(&hit("Acme raises seed round", "https://acme.ai/blog", 40), "h")
            .unwrap();
        assert_eq!(signal.signal_type, SignalType::HnMention);
    }

    #[test]
    fn low_point_and_aggregator_stories_are_dropped() {
        assert!(story_signal(&hit("Show HN: tiny", "https://tiny.dev", 3), "h").is_none());
        assert!(
            story_signal(&hit("Cool repo", "https://github.com/a/b", 120), "h").is_none()
        );
    }
}
