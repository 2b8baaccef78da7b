//! GitHub activity collector
//!
//! Watches founder accounts for signs of company formation: newly created
//! repositories in the window produce a `github_spike`, fresh pushes to
//! existing repositories a weaker `github_activity`.
//!
//! Rate limit: 5000 requests/hour authenticated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::CollectorError;
use crate::identity::IdentityEvidence;
use crate::models::SignalType;
use crate::net::SourceClient;

const API_BASE: &str = "https://api.github.com";

pub struct GithubActivityCollector {
    client: SourceClient,
    token: Option<String>,
    watch_users: Vec<String>,
}

impl GithubActivityCollector {
    pub fn new(client: SourceClient, token: Option<String>, watch_users: Vec<String>) -> Self {
        Self {
            client,
            token,
            watch_users,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("Accept", "application/vnd.github.v3+json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Repo {
    full_name: String,
    html_url: String,
    created_at: DateTime<Utc>,
    pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    stargazers_count: u32,
    #[serde(default)]
    fork: bool,
    homepage: Option<String>,
    owner: Owner,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

fn repo_signal(repo: &Repo, window: LookbackWindow, response_hash: &str) -> Option<CandidateSignal> {
    if repo.fork {
        return None;
    }

    let (signal_type, confidence, detected_at) = if window.contains(repo.created_at) {
        let confidence = if repo.stargazers_count >= 25 { 0.7 } else { 0.55 };
        (SignalType::GithubSpike, confidence, repo.created_at)
    } else if let Some(pushed_at) = repo.pushed_at.filter(|at| window.contains(*at)) {
        (SignalType::GithubActivity, 0.5, pushed_at)
    } else {
        return None;
    };

    let mut evidence = IdentityEvidence::default()
        .github_org(repo.owner.login.clone())
        .github_repo(repo.full_name.clone());
    if let Some(homepage) = repo.homepage.as_deref().filter(|h| !h.is_empty()) {
        evidence = evidence.website(homepage);
    }

    Some(CandidateSignal {
        signal_type,
        confidence,
        company_name: None,
        evidence,
        raw_data: serde_json::json!({
            "repo": repo.full_name,
            "owner": repo.owner.login,
            "stars": repo.stargazers_count,
            "created_at": repo.created_at,
            "pushed_at": repo.pushed_at,
            "homepage": repo.homepage,
        }),
        source_url: Some(repo.html_url.clone()),
        source_response_hash: Some(response_hash.to_string()),
        detected_at,
        warning_flags: Vec::new(),
    })
}

#[async_trait]
impl Collector for GithubActivityCollector {
    fn name(&self) -> &'static str {
        "github_activity"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let mut signals = Vec::new();

        for user in &self.watch_users {
            if cancel.is_cancelled() {
                return Err(CollectorError::Cancelled);
            }

            let url = format!("{API_BASE}/users/{user}/repos?sort=pushed&per_page=50");
            let body = self
                .client
                .send(self.authed(self.client.get(&url)), cancel)
                .await?;
            let hash = body.sha256_hex();
            let repos: Vec<Repo> = body.json()?;

            signals.extend(repos.iter().filter_map(|r| repo_signal(r, window, &hash)));
        }

        Ok(signals)
    }

    fn ping_url(&self) -> Option<String> {
        Some(format!("{API_BASE}/rate_limit"))
    }
}
