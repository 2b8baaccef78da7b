//! Suppression sync against a scripted CRM, and the collector-facing
//! behavior of a warm cache.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{crm_page, memory_store, valid_database, ScriptedCrm};
use prospector::config::AppConfig;
use prospector::crm::CrmConnector;
use prospector::suppression::SuppressionSync;

fn connector(transport: Arc<ScriptedCrm>) -> Arc<CrmConnector> {
    Arc::new(CrmConnector::new(transport, &AppConfig::default().crm))
}

fn one_page_of_records() -> serde_json::Value {
    json!({
        "results": [
            crm_page("page-1", "Passed", "Acme", Some("domain:acme.ai")),
            crm_page("page-2", "Tracking", "Beta Robotics", None),
        ],
        "has_more": false
    })
}

#[tokio::test]
async fn sync_populates_the_cache_with_derived_keys() {
    let store = memory_store().await;
    let transport = Arc::new(ScriptedCrm::new(valid_database()));
    transport.push_query_result(one_page_of_records());

    let sync = SuppressionSync::new(store.clone(), connector(transport), 7);
    let stats = sync.run(false).await.unwrap();

    assert_eq!(stats.pages_fetched, 2);
    assert_eq!(stats.entries_synced, 2);
    assert_eq!(stats.entries_with_strong_key, 1);
    assert_eq!(stats.entries_with_weak_key, 1);

    // Stored key is used verbatim for the first record.
    let acme = store.check_suppression("domain:acme.ai").await.unwrap().unwrap();
    assert_eq!(acme.status, "Passed");
    assert_eq!(acme.crm_page_id, "page-1");

    // The keyless record falls back to a name_loc key.
    let beta = store
        .check_suppression("name_loc:beta-robotics")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(beta.status, "Tracking");
}

#[tokio::test]
async fn back_to_back_syncs_are_idempotent_modulo_timestamps() {
    let store = memory_store().await;
    let transport = Arc::new(ScriptedCrm::new(valid_database()));
    transport.push_query_result(one_page_of_records());
    transport.push_query_result(one_page_of_records());

    let sync = SuppressionSync::new(store.clone(), connector(transport), 7);
    sync.run(false).await.unwrap();
    let first = store.check_suppression("domain:acme.ai").await.unwrap().unwrap();

    sync.run(false).await.unwrap();
    let second = store.check_suppression("domain:acme.ai").await.unwrap().unwrap();

    // Same content, refreshed in place.
    assert_eq!(first.canonical_key, second.canonical_key);
    assert_eq!(first.crm_page_id, second.crm_page_id);
    assert_eq!(first.status, second.status);
    assert!(second.cached_at >= first.cached_at);

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.active_suppression_entries, 2);
}

#[tokio::test]
async fn dry_run_reads_the_crm_but_writes_nothing() {
    let store = memory_store().await;
    let transport = Arc::new(ScriptedCrm::new(valid_database()));
    transport.push_query_result(one_page_of_records());

    let sync = SuppressionSync::new(store.clone(), connector(transport), 7);
    let stats = sync.run(true).await.unwrap();

    assert!(stats.dry_run);
    assert_eq!(stats.pages_fetched, 2);
    assert_eq!(stats.entries_synced, 0);
    assert!(store.check_suppression("domain:acme.ai").await.unwrap().is_none());
}
