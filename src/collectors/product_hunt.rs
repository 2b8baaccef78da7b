//! Product Hunt collector
//!
//! New launches in the window via the Product Hunt GraphQL API. A launch
//! means a public, marketable product exists; vote count nudges confidence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::CollectorError;
use crate::identity::IdentityEvidence;
use crate::models::SignalType;
use crate::net::SourceClient;

const API_URL: &str = "https://api.producthunt.com/v2/api/graphql";

const LAUNCH_QUERY: &str = r#"
query Launches($postedAfter: DateTime!) {
  posts(postedAfter: $postedAfter, order: NEWEST, first: 50) {
    edges {
      node {
        id
        name
        tagline
        url
        website
        votesCount
        createdAt
      }
    }
  }
}
"#;

pub struct ProductHuntCollector {
    client: SourceClient,
    api_key: String,
}

impl ProductHuntCollector {
    pub fn new(client: SourceClient, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PostsData>,
}

#[derive(Debug, Deserialize)]
struct PostsData {
    posts: PostsConnection,
}

#[derive(Debug, Deserialize)]
struct PostsConnection {
    #[serde(default)]
    edges: Vec<PostEdge>,
}

#[derive(Debug, Deserialize)]
struct PostEdge {
    node: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    name: String,
    tagline: Option<String>,
    url: String,
    website: Option<String>,
    #[serde(rename = "votesCount", default)]
    votes_count: u32,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

fn launch_signal(post: &Post, window: LookbackWindow, response_hash: &str) -> Option<CandidateSignal> {
    if !window.contains(post.created_at) {
        return None;
    }

    let mut evidence = IdentityEvidence::default().company_name(post.name.clone());
    if let Some(website) = post.website.as_deref().filter(|w| !w.is_empty()) {
        evidence = evidence.website(website);
    }

    let confidence = if post.votes_count >= 100 { 0.65 } else { 0.55 };

    Some(CandidateSignal {
        signal_type: SignalType::ProductLaunch,
        confidence,
        company_name: Some(post.name.clone()),
        evidence,
        raw_data: serde_json::json!({
            "post_id": post.id,
            "name": post.name,
            "tagline": post.tagline,
            "website": post.website,
            "votes": post.votes_count,
        }),
        source_url: Some(post.url.clone()),
        source_response_hash: Some(response_hash.to_string()),
        detected_at: post.created_at,
        warning_flags: Vec::new(),
    })
}

#[async_trait]
impl Collector for ProductHuntCollector {
    fn name(&self) -> &'static str {
        "product_hunt"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let body = serde_json::json!({
            "query": LAUNCH_QUERY,
            "variables": { "postedAfter": window.since.to_rfc3339() },
        });

        let request = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body);
        let response_body = self.client.send(request, cancel).await?;
        let hash = response_body.sha256_hex();
        let response: GraphQlResponse = response_body.json()?;

        let posts = response
            .data
            .map(|d| d.posts.edges)
            .unwrap_or_default();

        Ok(posts
            .iter()
            .filter_map(|edge| launch_signal(&edge.node, window, &hash))
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

    fn post(days_ago: i64, votes: u32) -> Post {
        serde_json::from_value(serde_json::json!({
            "id": "post-1",
            "name": "Acme Robots",
            "tagline": "Robots as a service",
            "url": "https://www.producthunt.com/posts/acme-robots",
            "website": "https://acme.ai",
            "votesCount": votes,
            "createdAt": Utc::now() - Duration::days(days_ago),
        }))
        .unwrap()
    }

    #[test]
    fn launch_in_window_is_a_signal() {
        let signal = launch_signal(&post(2, 40), LookbackWindow::days(7), "h").unwrap();
        assert_eq!(signal.signal_type, SignalType::ProductLaunch);
        assert_eq!(signal.evidence.website.as_deref(), Some("https://acme.ai"));
        assert!((signal.confidence - 0.55).abs() < 1e-9);
    }

    #[test]
    fn heavy_vote_count_bumps_confidence() {
        let signal = launch_signal(&post(2, 250), LookbackWindow::days(7), "h").unwrap();
        assert!((signal.confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn stale_launch_is_ignored() {
        assert!(launch_signal(&post(30, 40), LookbackWindow::days(7), "h").is_none());
    }
}
