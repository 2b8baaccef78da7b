//! Domain registration collector
//!
//! Checks watched domains against RDAP (the structured successor to WHOIS).
//! A registration event inside the lookback window signals company
//! formation. Anything else is skipped without a signal: domains registered
//! outside the window, records with no registration event, and domains RDAP
//! does not know (404).

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

const RDAP_BASE: &str = "https://rdap.org/domain";

pub struct DomainRdapCollector {
    client: SourceClient,
    watch_domains: Vec<String>,
}

impl DomainRdapCollector {
    pub fn new(client: SourceClient, watch_domains: Vec<String>) -> Self {
        Self {
            client,
            watch_domains,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RdapResponse {
    #[serde(default)]
    events: Vec<RdapEvent>,
    #[serde(default)]
    status: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    event_action: String,
    #[serde(rename = "eventDate")]
    event_date: Option<DateTime<Utc>>,
}

fn registration_signal(
    domain: &str,
    response: &RdapResponse,
    window: LookbackWindow,
    response_hash: &str,
) -> Option<CandidateSignal> {
    let registered_at = response
        .events
        .iter()
        .find(|e| e.event_action == "registration")
        .and_then(|e| e.event_date)?;

    if !window.contains(registered_at) {
        return None;
    }

    Some(CandidateSignal {
        signal_type: SignalType::DomainRegistration,
        confidence: 0.65,
        company_name: None,
        evidence: IdentityEvidence::default().website(domain),
        raw_data: serde_json::json!({
            "domain": domain,
            "registered_at": registered_at,
            "status": response.status,
        }),
        source_url: Some(format!("{RDAP_BASE}/{domain}")),
        source_response_hash: Some(response_hash.to_string()),
        detected_at: registered_at,
        warning_flags: Vec::new(),
    })
}

#[async_trait]
impl Collector for DomainRdapCollector {
    fn name(&self) -> &'static str {
        "domain_rdap"
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

            let url = format!("{RDAP_BASE}/{domain}");
            match self.client.send(self.client.get(&url), cancel).await {
                Ok(body) => {
                    let hash = body.sha256_hex();
                    let response: RdapResponse = body.json()?;
                    if let Some(signal) = registration_signal(domain, &response, window, &hash) {
                        signals.push(signal);
                    }
                }
                // Unregistered domains 404; nothing to report yet.
                Err(NetError::Permanent { message }) if message.contains("404") => {
                    debug!(domain = %domain, "no RDAP record");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(signals)
    }

    fn ping_url(&self) -> Option<String> {
        Some(format!("{RDAP_BASE}/example.com"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn response(registered_days_ago: i64) -> RdapResponse {
        serde_json::from_value(serde_json::json!({
            "events": [
                { "eventAction": "registration",
                  "eventDate": Utc::now() - Duration::days(registered_days_ago) },
                { "eventAction": "expiration",
                  "eventDate": Utc::now() + Duration::days(300) }
            ],
            "status": ["active"]
        }))
        .unwrap()
    }

    #[test]
    fn fresh_registration_is_a_signal() {
        let signal =
            registration_signal("acme.ai", &response(5), LookbackWindow::days(30), "h").unwrap();
        assert_eq!(signal.signal_type, SignalType::DomainRegistration);
        assert_eq!(signal.evidence.website.as_deref(), Some("acme.ai"));
    }

    #[test]
    fn old_registration_is_ignored() {
        assert!(
            registration_signal("acme.ai", &response(400), LookbackWindow::days(30), "h").is_none()
        );
    }

    #[test]
    fn response_without_registration_event_is_ignored() {
        let response: RdapResponse =
            serde_json::from_value(serde_json::json!({ "events": [], "status": [] })).unwrap();
        assert!(registration_signal("acme.ai", &response, LookbackWindow::days(30), "h").is_none());
    }
}
