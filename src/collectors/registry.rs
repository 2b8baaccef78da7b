//! Collector registry
//!
//! Maps collector names to instances. Collectors register at startup based
//! on configuration; sources whose credentials or watchlists are missing are
//! skipped with a warning rather than failing the whole pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use crate::collectors::trait_::Collector;
use crate::collectors::{
    arxiv::ArxivCollector, companies_house::CompaniesHouseCollector,
    crunchbase::CrunchbaseCollector, domain_rdap::DomainRdapCollector,
    github_activity::GithubActivityCollector, hacker_news::HackerNewsCollector,
    job_postings::JobPostingsCollector, product_hunt::ProductHuntCollector,
    sec_edgar::SecEdgarCollector, uspto::UsptoCollector,
};
use crate::config::AppConfig;
use crate::net::{RateLimiterPool, RetryPolicy, SourceClient};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("collector '{name}' not found")]
    CollectorNotFound { name: String },
}

/// In-memory registry of constructed collectors.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: BTreeMap<String, Box<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collector: Box<dyn Collector>) {
        self.collectors
            .insert(collector.name().to_string(), collector);
    }

    pub fn names(&self) -> Vec<String> {
        self.collectors.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collectors.contains_key(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Box<dyn Collector>, RegistryError> {
        self.collectors
            .get_mut(name)
            .ok_or_else(|| RegistryError::CollectorNotFound {
                name: name.to_string(),
            })
    }

    /// Remove a collector so it can run on its own task; put it back with
    /// [`CollectorRegistry::restore`] when the run finishes.
    pub fn take(&mut self, name: &str) -> Result<Box<dyn Collector>, RegistryError> {
        self.collectors
            .remove(name)
            .ok_or_else(|| RegistryError::CollectorNotFound {
                name: name.to_string(),
            })
    }

    pub fn restore(&mut self, collector: Box<dyn Collector>) {
        self.register(collector);
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Box<dyn Collector>)> {
        self.collectors.iter_mut()
    }
}

/// Construct every enabled collector that has what it needs to run.
pub async fn build_registry(config: &AppConfig, pool: &RateLimiterPool) -> CollectorRegistry {
    let mut registry = CollectorRegistry::new();
    let policy = RetryPolicy::from_config(&config.http);
    let timeout = Duration::from_secs(config.http.timeout_secs);

    let client = |pool_name: &str, limiter| SourceClient::new(pool_name, limiter, policy, timeout);
    let enabled = |name: &str| config.collectors.enabled.iter().any(|n| n == name);

    if enabled("sec_edgar") {
        let limiter = pool.get("sec_edgar").await;
        registry.register(Box::new(SecEdgarCollector::new(client("sec_edgar", limiter))));
    }

    if enabled("companies_house") {
        match config.collectors.companies_house_api_key.clone() {
            Some(api_key) => {
                let limiter = pool.get("companies_house").await;
                registry.register(Box::new(CompaniesHouseCollector::new(
                    client("companies_house", limiter),
                    api_key,
                )));
            }
            None => warn!("companies_house collector not registered: missing API key"),
        }
    }

    if enabled("github_activity") {
        if config.collectors.github_watch_users.is_empty() {
            warn!("github_activity collector not registered: no watched users configured");
        } else {
            let limiter = pool.get("github_activity").await;
            registry.register(Box::new(GithubActivityCollector::new(
                client("github_activity", limiter),
                config.collectors.github_token.clone(),
                config.collectors.github_watch_users.clone(),
            )));
        }
    }

    if enabled("hacker_news") {
        let limiter = pool.get("hacker_news").await;
        registry.register(Box::new(HackerNewsCollector::new(client(
            "hacker_news",
            limiter,
        ))));
    }

    if enabled("domain_rdap") {
        if config.collectors.watch_domains.is_empty() {
            warn!("domain_rdap collector not registered: no watched domains configured");
        } else {
            let limiter = pool.get("domain_rdap").await;
            registry.register(Box::new(DomainRdapCollector::new(
                client("domain_rdap", limiter),
                config.collectors.watch_domains.clone(),
            )));
        }
    }

    if enabled("product_hunt") {
        match config.collectors.product_hunt_api_key.clone() {
            Some(api_key) => {
                let limiter = pool.get("product_hunt").await;
                registry.register(Box::new(ProductHuntCollector::new(
                    client("product_hunt", limiter),
                    api_key,
                )));
            }
            None => warn!("product_hunt collector not registered: missing API key"),
        }
    }

    if enabled("arxiv") {
        let limiter = pool.get("arxiv").await;
        registry.register(Box::new(ArxivCollector::new(client("arxiv", limiter))));
    }

    if enabled("uspto") {
        let limiter = pool.get("uspto").await;
        registry.register(Box::new(UsptoCollector::new(client("uspto", limiter))));
    }

    if enabled("job_postings") {
        if config.collectors.watch_domains.is_empty() {
            warn!("job_postings collector not registered: no watched domains configured");
        } else {
            let limiter = pool.get("job_postings").await;
            registry.register(Box::new(JobPostingsCollector::new(
                client("job_postings", limiter),
                config.collectors.watch_domains.clone(),
            )));
        }
    }

    if enabled("crunchbase") {
        match config.collectors.crunchbase_api_key.clone() {
            Some(api_key) => {
                let limiter = pool.get("crunchbase").await;
                registry.register(Box::new(CrunchbaseCollector::new(
                    client("crunchbase", limiter),
                    api_key,
                )));
            }
            None => warn!("crunchbase collector not registered: missing API key"),
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn credentialless_sources_always_register() {
        let config = AppConfig::default();
        let pool = RateLimiterPool::new(HashMap::new());
        let registry = build_registry(&config, &pool).await;

        for name in ["sec_edgar", "hacker_news", "arxiv", "uspto"] {
            assert!(registry.contains(name), "{name} should be registered");
        }
        // No credentials or watchlists in the default config.
        for name in ["companies_house", "product_hunt", "crunchbase", "github_activity"] {
            assert!(!registry.contains(name), "{name} should be skipped");
        }
    }

    #[tokio::test]
    async fn watchlist_sources_register_when_configured() {
        let mut config = AppConfig::default();
        config.collectors.watch_domains = vec!["acme.ai".to_string()];
        config.collectors.github_watch_users = vec!["founder".to_string()];
        let pool = RateLimiterPool::new(HashMap::new());
        let registry = build_registry(&config, &pool).await;

        assert!(registry.contains("domain_rdap"));
        assert!(registry.contains("job_postings"));
        assert!(registry.contains("github_activity"));
    }

    #[tokio::test]
    async fn unknown_name_errors() {
        let mut registry = CollectorRegistry::new();
        let result = registry.get_mut("nope");
        assert!(matches!(
            result,
            Err(RegistryError::CollectorNotFound { .. })
        ));
    }
}
