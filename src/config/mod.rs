//! Configuration loading for the discovery pipeline.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PROSPECTOR_`, producing a typed [`AppConfig`]. Later layers win:
//! `.env` < `.env.local` < `.env.<profile>` < `.env.<profile>.local` <
//! process environment.

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Application configuration derived from `PROSPECTOR_*` environment
/// variables.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub profile: String,
    pub log_level: String,
    pub store: StoreConfig,
    pub crm: CrmConfig,
    pub gate: GateSettings,
    pub http: HttpConfig,
    pub collectors: CollectorsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub path: String,
    pub suppression_ttl_days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrmConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub database_id: Option<String>,
    pub api_base: String,
    /// Status the CRM uses for auto-pushed prospects.
    pub auto_push_status: String,
    /// Status the CRM uses for prospects needing review.
    pub needs_review_status: String,
    /// Statuses the fund has decided against; never overwritten.
    pub terminal_statuses: Vec<String>,
    /// The remaining human-workflow statuses on the CRM board. These must
    /// match the CRM's literal enum values, historical spellings included.
    pub workflow_statuses: Vec<String>,
    pub stage_options: Vec<String>,
    pub schema_cache_ttl_hours: u64,
}

impl CrmConfig {
    /// Every status that marks a record as already present in the CRM.
    pub fn suppress_statuses(&self) -> Vec<String> {
        let mut all = vec![
            self.auto_push_status.clone(),
            self.needs_review_status.clone(),
        ];
        all.extend(self.workflow_statuses.iter().cloned());
        all.extend(self.terminal_statuses.iter().cloned());
        all.dedup();
        all
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateSettings {
    pub high_threshold: f64,
    pub medium_threshold: f64,
    /// Require at least two sources for auto-push.
    pub strict_mode: bool,
    /// Per-signal-type base weight overrides, keyed by canonical type string.
    pub weights: BTreeMap<String, f64>,
    /// Per-signal-type decay half-life overrides, in days.
    pub half_lives: BTreeMap<String, f64>,
    /// Source-reliability tier multiplier overrides, keyed by tier 1..=4.
    pub tier_multipliers: BTreeMap<u8, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpConfig {
    pub retries: u32,
    pub backoff_base: f64,
    pub backoff_max: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectorsConfig {
    /// Collector names run by `collect`/`full` when no explicit list is given.
    pub enabled: Vec<String>,
    pub lookback_days: i64,
    /// Run a suppression sync at orchestrator startup.
    pub warmup_sync: bool,
    /// Overrides for per-source token buckets, `rate/period_secs[/burst]`.
    pub rate_limits: BTreeMap<String, RateLimitSpec>,
    #[serde(skip_serializing)]
    pub github_token: Option<String>,
    #[serde(skip_serializing)]
    pub companies_house_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub product_hunt_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub crunchbase_api_key: Option<String>,
    /// Founder GitHub accounts watched by the github_activity collector.
    pub github_watch_users: Vec<String>,
    /// Domains watched by the domain_rdap and job_postings collectors.
    pub watch_domains: Vec<String>,
}

/// Token-bucket shape for one source API.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitSpec {
    pub rate: u32,
    pub period_secs: u64,
    pub burst: u32,
}

impl RateLimitSpec {
    /// Parse `rate/period_secs` or `rate/period_secs/burst`.
    fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split('/');
        let rate: u32 = parts.next()?.trim().parse().ok()?;
        let period_secs: u64 = parts.next()?.trim().parse().ok()?;
        let burst: u32 = match parts.next() {
            Some(b) => b.trim().parse().ok()?,
            None => rate.min(10).max(1),
        };
        if parts.next().is_some() || rate == 0 || period_secs == 0 {
            return None;
        }
        Some(Self {
            rate,
            period_secs,
            burst,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            store: StoreConfig {
                path: default_store_path(),
                suppression_ttl_days: 7,
            },
            crm: CrmConfig {
                api_key: None,
                database_id: None,
                api_base: default_crm_api_base(),
                auto_push_status: "Source".to_string(),
                needs_review_status: "Tracking".to_string(),
                terminal_statuses: split_list("Passed,Lost"),
                workflow_statuses: split_list(
                    "Initial Meeting / Call,Dilligence,Committed,Funded",
                ),
                stage_options: split_list(
                    "Pre-Seed,Seed,Seed +,Series A,Series B,Series C,Series D",
                ),
                schema_cache_ttl_hours: 6,
            },
            gate: GateSettings {
                high_threshold: 0.70,
                medium_threshold: 0.40,
                strict_mode: false,
                weights: BTreeMap::new(),
                half_lives: BTreeMap::new(),
                tier_multipliers: BTreeMap::new(),
            },
            http: HttpConfig {
                retries: 3,
                backoff_base: 2.0,
                backoff_max: 30.0,
                timeout_secs: 10,
            },
            collectors: CollectorsConfig {
                enabled: split_list(
                    "sec_edgar,companies_house,github_activity,hacker_news,domain_rdap,\
                     product_hunt,arxiv,uspto,job_postings,crunchbase",
                ),
                lookback_days: 7,
                warmup_sync: true,
                rate_limits: BTreeMap::new(),
                github_token: None,
                companies_house_api_key: None,
                product_hunt_api_key: None,
                crunchbase_api_key: None,
                github_watch_users: Vec::new(),
                watch_domains: Vec::new(),
            },
        }
    }
}

impl AppConfig {
    /// CRM credentials, required for `process`, `sync` and `full`.
    pub fn require_crm(&self) -> Result<(&str, &str), ConfigError> {
        match (self.crm.api_key.as_deref(), self.crm.database_id.as_deref()) {
            (Some(key), Some(db)) if !key.is_empty() && !db.is_empty() => Ok((key, db)),
            _ => Err(ConfigError::MissingCrmCredentials),
        }
    }

    /// Returns a redacted JSON representation; secrets are skipped by serde.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_path() -> String {
    "signals.db".to_string()
}

fn default_crm_api_base() -> String {
    "https://api.notion.com/v1".to_string()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("CRM credentials not configured (PROSPECTOR_CRM_API_KEY / PROSPECTOR_CRM_DATABASE_ID)")]
    MissingCrmCredentials,
}

/// Loads configuration using layered `.env` files and `PROSPECTOR_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("PROSPECTOR_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut config = AppConfig::default();
        config.profile = take(&mut layered, "PROFILE").unwrap_or(profile_hint);

        if let Some(v) = take(&mut layered, "LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = take(&mut layered, "STORE_PATH") {
            config.store.path = v;
        }
        if let Some(v) = take(&mut layered, "SUPPRESSION_TTL_DAYS") {
            config.store.suppression_ttl_days = parse(&v, "SUPPRESSION_TTL_DAYS")?;
        }

        config.crm.api_key = take(&mut layered, "CRM_API_KEY");
        config.crm.database_id = take(&mut layered, "CRM_DATABASE_ID");
        if let Some(v) = take(&mut layered, "CRM_API_BASE") {
            config.crm.api_base = v;
        }
        if let Some(v) = take(&mut layered, "CRM_STATUS_AUTO_PUSH") {
            config.crm.auto_push_status = v;
        }
        if let Some(v) = take(&mut layered, "CRM_STATUS_NEEDS_REVIEW") {
            config.crm.needs_review_status = v;
        }
        if let Some(v) = take(&mut layered, "CRM_TERMINAL_STATUSES") {
            config.crm.terminal_statuses = split_list(&v);
        }
        if let Some(v) = take(&mut layered, "CRM_WORKFLOW_STATUSES") {
            config.crm.workflow_statuses = split_list(&v);
        }
        if let Some(v) = take(&mut layered, "CRM_STAGE_OPTIONS") {
            config.crm.stage_options = split_list(&v);
        }
        if let Some(v) = take(&mut layered, "CRM_SCHEMA_CACHE_TTL_HOURS") {
            config.crm.schema_cache_ttl_hours = parse(&v, "CRM_SCHEMA_CACHE_TTL_HOURS")?;
        }

        if let Some(v) = take(&mut layered, "GATE_HIGH_THRESHOLD") {
            config.gate.high_threshold = parse(&v, "GATE_HIGH_THRESHOLD")?;
        }
        if let Some(v) = take(&mut layered, "GATE_MEDIUM_THRESHOLD") {
            config.gate.medium_threshold = parse(&v, "GATE_MEDIUM_THRESHOLD")?;
        }
        if let Some(v) = take(&mut layered, "GATE_STRICT_MODE") {
            config.gate.strict_mode = parse_bool(&v, "GATE_STRICT_MODE")?;
        }

        if let Some(v) = take(&mut layered, "HTTP_RETRIES") {
            config.http.retries = parse(&v, "HTTP_RETRIES")?;
        }
        if let Some(v) = take(&mut layered, "HTTP_BACKOFF_BASE") {
            config.http.backoff_base = parse(&v, "HTTP_BACKOFF_BASE")?;
        }
        if let Some(v) = take(&mut layered, "HTTP_BACKOFF_MAX") {
            config.http.backoff_max = parse(&v, "HTTP_BACKOFF_MAX")?;
        }
        if let Some(v) = take(&mut layered, "HTTP_TIMEOUT_SECS") {
            config.http.timeout_secs = parse(&v, "HTTP_TIMEOUT_SECS")?;
        }

        if let Some(v) = take(&mut layered, "COLLECTORS_ENABLED") {
            config.collectors.enabled = split_list(&v);
        }
        if let Some(v) = take(&mut layered, "LOOKBACK_DAYS") {
            config.collectors.lookback_days = parse(&v, "LOOKBACK_DAYS")?;
        }
        if let Some(v) = take(&mut layered, "WARMUP_SYNC") {
            config.collectors.warmup_sync = parse_bool(&v, "WARMUP_SYNC")?;
        }
        config.collectors.github_token = take(&mut layered, "GITHUB_TOKEN");
        config.collectors.companies_house_api_key = take(&mut layered, "COMPANIES_HOUSE_API_KEY");
        config.collectors.product_hunt_api_key = take(&mut layered, "PRODUCT_HUNT_API_KEY");
        config.collectors.crunchbase_api_key = take(&mut layered, "CRUNCHBASE_API_KEY");
        if let Some(v) = take(&mut layered, "GITHUB_WATCH_USERS") {
            config.collectors.github_watch_users = split_list(&v);
        }
        if let Some(v) = take(&mut layered, "WATCH_DOMAINS") {
            config.collectors.watch_domains = split_list(&v);
        }

        // Remaining keys carry dynamic suffixes.
        for (key, value) in layered {
            if let Some(signal_type) = key.strip_prefix("GATE_WEIGHT_") {
                config
                    .gate
                    .weights
                    .insert(signal_type.to_lowercase(), parse(&value, &key)?);
            } else if let Some(signal_type) = key.strip_prefix("GATE_HALF_LIFE_") {
                config
                    .gate
                    .half_lives
                    .insert(signal_type.to_lowercase(), parse(&value, &key)?);
            } else if let Some(tier) = key.strip_prefix("GATE_TIER_MULTIPLIER_") {
                let tier: u8 = parse(tier, &key)?;
                config
                    .gate
                    .tier_multipliers
                    .insert(tier, parse(&value, &key)?);
            } else if let Some(source) = key.strip_prefix("RATE_LIMIT_") {
                let spec =
                    RateLimitSpec::parse(&value).ok_or_else(|| ConfigError::InvalidValue {
                        key: key.clone(),
                        value: value.clone(),
                    })?;
                config
                    .collectors
                    .rate_limits
                    .insert(source.to_lowercase(), spec);
            }
        }

        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("PROSPECTOR_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("PROSPECTOR_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take(map: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    map.remove(key).filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.store.suppression_ttl_days, 7);
        assert_eq!(config.gate.high_threshold, 0.70);
        assert_eq!(config.crm.terminal_statuses, vec!["Passed", "Lost"]);
        assert!(config.collectors.enabled.contains(&"sec_edgar".to_string()));
    }

    #[test]
    fn suppress_statuses_covers_the_whole_board() {
        let config = AppConfig::default();
        let statuses = config.crm.suppress_statuses();
        for expected in ["Source", "Tracking", "Dilligence", "Passed", "Lost"] {
            assert!(statuses.iter().any(|s| s == expected), "missing {expected}");
        }
    }

    #[test]
    fn rate_limit_spec_parsing() {
        let spec = RateLimitSpec::parse("600/300").unwrap();
        assert_eq!(spec.rate, 600);
        assert_eq!(spec.period_secs, 300);

        let spec = RateLimitSpec::parse("10/1/5").unwrap();
        assert_eq!(spec.burst, 5);

        assert!(RateLimitSpec::parse("0/1").is_none());
        assert!(RateLimitSpec::parse("nope").is_none());
    }

    #[test]
    fn missing_crm_credentials_is_a_config_error() {
        let config = AppConfig::default();
        assert!(matches!(
            config.require_crm(),
            Err(ConfigError::MissingCrmCredentials)
        ));
    }

    #[test]
    fn redacted_json_omits_secrets() {
        let mut config = AppConfig::default();
        config.crm.api_key = Some("secret_xyz".to_string());
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("secret_xyz"));
    }
}
