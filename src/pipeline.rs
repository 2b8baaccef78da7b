//! Pipeline orchestrator
//!
//! Single entry point binding the store, collectors, gate, CRM connector,
//! pusher, and suppression sync into the `collect`, `process`, `sync`,
//! `full`, `stats`, and `health` jobs. Phases are independent: a failed
//! collector never blocks the others or the pusher; only store-level errors
//! abort a phase.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use migration::{Migrator, MigratorTrait};

use crate::collectors::{
    build_registry, run_collector, CollectorRegistry, CollectorResult, LookbackWindow,
};
use crate::config::AppConfig;
use crate::crm::{CrmConnector, HttpTransport};
use crate::db;
use crate::error::PipelineError;
use crate::gate::{GateConfig, VerificationGate};
use crate::models::pipeline_run::Model as PipelineRunModel;
use crate::net::{RateLimiterPool, RetryPolicy, SourceClient};
use crate::pusher::{BatchResult, CrmPusher};
use crate::store::{SignalStore, StoreStats};
use crate::suppression::{SuppressionSync, SyncStats};

/// Combined report for the `full` command.
#[derive(Debug, serde::Serialize)]
pub struct FullReport {
    pub run_id: String,
    pub sync: Option<SyncStats>,
    pub collect: Vec<CollectorResult>,
    pub process: Option<BatchResult>,
}

impl FullReport {
    /// Partial-failure error for exit-code mapping, if anything went wrong.
    pub fn failure(&self) -> Option<PipelineError> {
        let mut problems = Vec::new();
        for result in &self.collect {
            if !result.errors.is_empty() {
                problems.push(format!(
                    "collector {} had {} error(s)",
                    result.collector,
                    result.errors.len()
                ));
            }
        }
        if let Some(batch) = &self.process {
            if batch.has_errors() {
                problems.push(format!("{} upsert error(s)", batch.error_messages.len()));
            }
        }
        if problems.is_empty() {
            None
        } else {
            Some(PipelineError::Partial(problems.join("; ")))
        }
    }
}

/// Health probe report for `prospector health`.
#[derive(Debug, serde::Serialize)]
pub struct HealthReport {
    pub store_ok: bool,
    pub sources: Vec<SourceHealth>,
    pub crm_schema_valid: Option<bool>,
    pub crm_schema_report: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct SourceHealth {
    pub source: String,
    pub ok: bool,
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.store_ok
            && self.sources.iter().all(|s| s.ok)
            && self.crm_schema_valid.unwrap_or(true)
    }
}

/// The orchestrator. Owns one store handle and the shared limiter pool.
pub struct Pipeline {
    config: AppConfig,
    store: SignalStore,
    registry: CollectorRegistry,
    connector: Option<Arc<CrmConnector>>,
    pool: Arc<RateLimiterPool>,
    cancel: CancellationToken,
    run_id: String,
}

impl Pipeline {
    /// Open the store, apply migrations, build collectors, and (when
    /// configured and the CRM is reachable) warm the suppression cache.
    pub async fn initialize(
        config: AppConfig,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let conn = db::init_store(&config)
            .await
            .map_err(|e| PipelineError::Config(format!("store init failed: {e}")))?;
        Migrator::up(&conn, None)
            .await
            .map_err(crate::error::StoreError::from)?;

        Self::with_connection(config, conn, cancel).await
    }

    /// Assemble a pipeline over an existing connection (tests use
    /// `sqlite::memory:` here).
    pub async fn with_connection(
        config: AppConfig,
        conn: DatabaseConnection,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let store = SignalStore::new(conn);
        let pool = Arc::new(RateLimiterPool::new(
            config
                .collectors
                .rate_limits
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect::<HashMap<_, _>>(),
        ));

        let registry = build_registry(&config, &pool).await;

        let connector = match config.require_crm() {
            Ok((api_key, database_id)) => {
                let limiter = pool.get("notion").await;
                let client = SourceClient::new(
                    "notion",
                    limiter,
                    RetryPolicy::from_config(&config.http),
                    Duration::from_secs(config.http.timeout_secs),
                );
                let transport = HttpTransport::new(
                    client,
                    config.crm.api_base.clone(),
                    api_key.to_string(),
                    database_id.to_string(),
                    cancel.clone(),
                );
                Some(Arc::new(CrmConnector::new(Arc::new(transport), &config.crm)))
            }
            Err(_) => None,
        };

        let pipeline = Self {
            config,
            store,
            registry,
            connector,
            pool,
            cancel,
            run_id: format!("run-{}", Uuid::new_v4()),
        };

        if pipeline.config.collectors.warmup_sync && pipeline.connector.is_some() {
            match pipeline.sync(None, false).await {
                Ok(stats) => info!(synced = stats.entries_synced, "warmup suppression sync done"),
                Err(err) => warn!(error = %err, "warmup suppression sync failed; continuing"),
            }
        }

        Ok(pipeline)
    }

    /// Swap in a pre-built CRM connector (tests inject scripted transports).
    pub fn with_crm_connector(mut self, connector: Arc<CrmConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn limiter_pool(&self) -> Arc<RateLimiterPool> {
        Arc::clone(&self.pool)
    }

    fn crm(&self) -> Result<Arc<CrmConnector>, PipelineError> {
        self.connector.clone().ok_or_else(|| {
            PipelineError::Config(
                "CRM credentials not configured (PROSPECTOR_CRM_API_KEY / PROSPECTOR_CRM_DATABASE_ID)"
                    .to_string(),
            )
        })
    }

    fn gate(&self) -> VerificationGate {
        VerificationGate::new(GateConfig::from_settings(&self.config.gate, &self.config.crm))
    }

    /// Run the named collectors (or all registered ones) concurrently.
    #[instrument(skip_all)]
    pub async fn collect(
        &mut self,
        only: Option<Vec<String>>,
        dry_run: bool,
        lookback_days: Option<i64>,
    ) -> Result<Vec<CollectorResult>, PipelineError> {
        let names = match only {
            Some(names) => {
                for name in &names {
                    if !self.registry.contains(name) {
                        return Err(PipelineError::Config(format!(
                            "unknown or unregistered collector: {name}"
                        )));
                    }
                }
                names
            }
            None => self.registry.names(),
        };

        if names.is_empty() {
            warn!("no collectors registered; nothing to collect");
            return Ok(Vec::new());
        }

        let window =
            LookbackWindow::days(lookback_days.unwrap_or(self.config.collectors.lookback_days));

        let mut handles = Vec::new();
        for name in names {
            let mut collector = self
                .registry
                .take(&name)
                .map_err(|e| PipelineError::Config(e.to_string()))?;
            let store = self.store.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                let result =
                    run_collector(collector.as_mut(), &store, window, dry_run, &cancel).await;
                (collector, result)
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((collector, result)) => {
                    self.registry.restore(collector);
                    results.push(result);
                }
                Err(join_err) => {
                    error!(error = %join_err, "collector task panicked");
                    results.push(CollectorResult::empty(
                        "unknown",
                        crate::collectors::CollectorStatus::Error,
                        dry_run,
                    ));
                }
            }
        }

        Ok(results)
    }

    /// Run the CRM pusher once.
    pub async fn process(
        &self,
        limit: Option<u64>,
        dry_run: bool,
    ) -> Result<BatchResult, PipelineError> {
        let connector = self.crm()?;
        let pusher = CrmPusher::new(self.store.clone(), connector, self.gate());
        pusher.process_batch(limit, dry_run, &self.cancel).await
    }

    /// Run the suppression sync once.
    pub async fn sync(
        &self,
        ttl_days: Option<i64>,
        dry_run: bool,
    ) -> Result<SyncStats, PipelineError> {
        let connector = self.crm()?;
        let sync = SuppressionSync::new(
            self.store.clone(),
            connector,
            ttl_days.unwrap_or(self.config.store.suppression_ttl_days),
        );
        sync.run(dry_run).await
    }

    /// sync -> collect -> process; later phases run unless the store fails.
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn full(
        &mut self,
        only: Option<Vec<String>>,
        dry_run: bool,
        lookback_days: Option<i64>,
        limit: Option<u64>,
        ttl_days: Option<i64>,
    ) -> Result<FullReport, PipelineError> {
        let started = Utc::now();
        let mut report = FullReport {
            run_id: self.run_id.clone(),
            sync: None,
            collect: Vec::new(),
            process: None,
        };

        match self.sync(ttl_days, dry_run).await {
            Ok(stats) => report.sync = Some(stats),
            Err(err @ PipelineError::Store(_)) => return Err(err),
            Err(err) => warn!(error = %err, "sync phase failed; continuing"),
        }

        report.collect = self.collect(only, dry_run, lookback_days).await?;

        match self.process(limit, dry_run).await {
            Ok(batch) => report.process = Some(batch),
            Err(err @ PipelineError::Store(_)) => return Err(err),
            Err(err @ PipelineError::SchemaPreflight(_)) => return Err(err),
            Err(err) => warn!(error = %err, "process phase failed"),
        }

        if !dry_run {
            let completed = Utc::now();
            let run = PipelineRunModel {
                id: Uuid::new_v4(),
                run_id: self.run_id.clone(),
                started_at: started,
                completed_at: Some(completed),
                duration_seconds: Some(
                    (completed - started).num_milliseconds().max(0) as f64 / 1000.0,
                ),
                collectors_run: report.collect.len() as i32,
                collectors_failed: report
                    .collect
                    .iter()
                    .filter(|r| !r.errors.is_empty())
                    .count() as i32,
                signals_found: report.collect.iter().map(|r| r.signals_found).sum::<usize>() as i32,
                signals_new: report.collect.iter().map(|r| r.signals_new).sum::<usize>() as i32,
                signals_suppressed: report
                    .collect
                    .iter()
                    .map(|r| r.signals_suppressed)
                    .sum::<usize>() as i32,
                prospects_created: report.process.as_ref().map(|b| b.prospects_created).unwrap_or(0)
                    as i32,
                prospects_updated: report.process.as_ref().map(|b| b.prospects_updated).unwrap_or(0)
                    as i32,
                prospects_skipped: report.process.as_ref().map(|b| b.prospects_skipped).unwrap_or(0)
                    as i32,
                suppression_synced: report.sync.as_ref().map(|s| s.entries_synced).unwrap_or(0)
                    as i32,
                errors: Some(serde_json::json!(report
                    .collect
                    .iter()
                    .flat_map(|r| r.errors.clone())
                    .chain(
                        report
                            .process
                            .as_ref()
                            .map(|b| b.error_messages.clone())
                            .unwrap_or_default()
                    )
                    .collect::<Vec<_>>())),
                created_at: completed,
            };
            if let Err(err) = self.store.record_pipeline_run(run).await {
                warn!(error = %err, "failed to record pipeline run");
            }
        }

        Ok(report)
    }

    pub async fn stats(&self) -> Result<StoreStats, PipelineError> {
        Ok(self.store.get_stats().await?)
    }

    /// Probe store connectivity, each registered source, and the CRM schema.
    pub async fn health(&mut self) -> HealthReport {
        let store_ok = db::health_check(self.store.connection()).await.is_ok();

        let policy = RetryPolicy::from_config(&self.config.http);
        let timeout = Duration::from_secs(self.config.http.timeout_secs);
        let mut sources = Vec::new();

        let names = self.registry.names();
        for name in names {
            let ping_url = self
                .registry
                .get_mut(&name)
                .ok()
                .and_then(|c| c.ping_url());
            let Some(url) = ping_url else {
                sources.push(SourceHealth {
                    source: name,
                    ok: true,
                    detail: Some("no ping endpoint".to_string()),
                });
                continue;
            };

            let limiter = self.pool.get(&name).await;
            let client = SourceClient::new(name.clone(), limiter, policy, timeout);
            match client.ping(&url, &self.cancel).await {
                Ok(()) => sources.push(SourceHealth {
                    source: name,
                    ok: true,
                    detail: None,
                }),
                Err(err) => sources.push(SourceHealth {
                    source: name,
                    ok: false,
                    detail: Some(err.to_string()),
                }),
            }
        }

        let (crm_schema_valid, crm_schema_report) = match &self.connector {
            Some(connector) => match connector.validate_schema(true).await {
                Ok(report) => (Some(report.is_valid()), Some(report.to_string())),
                Err(err) => (Some(false), Some(err.to_string())),
            },
            None => (None, None),
        };

        HealthReport {
            store_ok,
            sources,
            crm_schema_valid,
            crm_schema_report,
        }
    }
}
