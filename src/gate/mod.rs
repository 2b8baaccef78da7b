//! # Verification Gate
//!
//! Pure evaluator: given every stored signal for one canonical key, produce
//! a confidence score and a routing decision. No I/O, no clock access (the
//! caller supplies `now`), no failure modes; empty input holds.
//!
//! Confidence model:
//! 1. per-signal contribution = type weight × decay × collector confidence ×
//!    source-tier multiplier, where decay = `0.5^(age_days / half_life)`
//! 2. anti-inflation: only the strongest contribution per signal type counts
//! 3. base = weighted average: kept contributions normalized by the weight
//!    mass of the contributing types, so the score reads as "how fulfilled
//!    is the evidence we actually have", not "how many kinds exist"
//! 4. negative signal types scale the base down instead of adding
//! 5. multi-source boost ×1.15 (2 APIs) or ×1.30 (3+)
//! 6. convergence boost ×1.2 (2 distinct types) or ×1.5 (3+)
//! 7. each collector-provided warning flag subtracts 0.15
//! 8. clamp to [0.0, 0.95], never fully certain

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{CrmConfig, GateSettings};
use crate::models::SignalType;

/// Routing decision for one prospect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutoPush,
    NeedsReview,
    Hold,
    Reject,
}

/// One signal as the gate sees it.
#[derive(Debug, Clone)]
pub struct GateSignal {
    pub id: String,
    pub signal_type: SignalType,
    pub source_api: String,
    /// The collector's own belief, 0.0..=1.0.
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
    /// Collector-provided caveats, each worth a 0.15 penalty.
    pub warning_flags: Vec<String>,
}

/// Auditable confidence calculation.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceBreakdown {
    pub overall: f64,
    pub base_score: f64,
    pub multi_source_boost: f64,
    pub convergence_boost: f64,
    pub warning_penalty: f64,
    /// Distinct signal types that contributed (one each, post anti-inflation).
    pub signals_contributing: usize,
    pub sources: Vec<String>,
    pub signal_details: Vec<SignalDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalDetail {
    pub id: String,
    pub signal_type: String,
    pub source: String,
    pub weight: f64,
    pub decay_factor: f64,
    pub tier_multiplier: f64,
    pub contribution: f64,
    pub age_days: f64,
}

/// Result of gate evaluation.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub decision: Decision,
    pub confidence: f64,
    /// CRM status to route to; `None` means do not push.
    pub suggested_status: Option<String>,
    pub reason: String,
    pub breakdown: ConfidenceBreakdown,
}

impl GateOutcome {
    /// Decision-time audit blob stored on processing records.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "decision": self.decision,
            "confidence": (self.confidence * 1000.0).round() / 1000.0,
            "reason": self.reason,
            "breakdown": self.breakdown,
        })
    }
}

/// Ceiling on every confidence the gate emits.
pub const CONFIDENCE_CEILING: f64 = 0.95;

const WARNING_FLAG_PENALTY: f64 = 0.15;
const DEFAULT_WEIGHT: f64 = 0.05;
const DEFAULT_HALF_LIFE_DAYS: f64 = 90.0;

/// Gate configuration resolved from [`GateSettings`] and CRM routing strings.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub strict_mode: bool,
    pub auto_push_status: String,
    pub needs_review_status: String,
    pub high_threshold: f64,
    pub medium_threshold: f64,
    weights: HashMap<String, f64>,
    half_lives: HashMap<String, f64>,
    tier_multipliers: [f64; 4],
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            auto_push_status: "Source".to_string(),
            needs_review_status: "Tracking".to_string(),
            high_threshold: 0.70,
            medium_threshold: 0.40,
            weights: HashMap::new(),
            half_lives: HashMap::new(),
            tier_multipliers: [1.00, 0.85, 0.70, 0.50],
        }
    }
}

impl GateConfig {
    pub fn from_settings(settings: &GateSettings, crm: &CrmConfig) -> Self {
        let mut config = Self {
            strict_mode: settings.strict_mode,
            auto_push_status: crm.auto_push_status.clone(),
            needs_review_status: crm.needs_review_status.clone(),
            high_threshold: settings.high_threshold,
            medium_threshold: settings.medium_threshold,
            weights: settings.weights.clone().into_iter().collect(),
            half_lives: settings.half_lives.clone().into_iter().collect(),
            ..Self::default()
        };
        for (tier, multiplier) in &settings.tier_multipliers {
            if (1..=4).contains(tier) {
                config.tier_multipliers[(*tier - 1) as usize] = *multiplier;
            }
        }
        config
    }

    fn weight(&self, signal_type: SignalType) -> f64 {
        if let Some(w) = self.weights.get(signal_type.as_str()) {
            return *w;
        }
        match signal_type {
            SignalType::Incorporation => 0.25,
            SignalType::FundingEvent => 0.20,
            SignalType::GithubSpike => 0.20,
            SignalType::GithubActivity => 0.18,
            SignalType::DomainRegistration => 0.15,
            SignalType::PatentFiling => 0.15,
            SignalType::ProductLaunch => 0.10,
            SignalType::SocialAnnouncement => 0.10,
            SignalType::HnMention => 0.08,
            SignalType::JobPosting => 0.30,
            SignalType::ResearchPaper => 0.05,
            SignalType::CofounderSearch => 0.05,
            _ => DEFAULT_WEIGHT,
        }
    }

    fn half_life_days(&self, signal_type: SignalType) -> f64 {
        if let Some(h) = self.half_lives.get(signal_type.as_str()) {
            return *h;
        }
        match signal_type {
            SignalType::Incorporation => 365.0,
            SignalType::GithubSpike => 14.0,
            SignalType::DomainRegistration => 90.0,
            SignalType::PatentFiling => 180.0,
            SignalType::ProductLaunch => 30.0,
            SignalType::SocialAnnouncement => 30.0,
            SignalType::CofounderSearch => 60.0,
            SignalType::ResearchPaper => 180.0,
            SignalType::FundingEvent => 180.0,
            SignalType::JobPosting => 45.0,
            SignalType::GithubActivity => 30.0,
            SignalType::HnMention => 21.0,
            _ => DEFAULT_HALF_LIFE_DAYS,
        }
    }

    fn tier_multiplier(&self, source_api: &str) -> f64 {
        self.tier_multipliers[(source_tier(source_api) - 1) as usize]
    }
}

/// Source reliability tier: 1 authoritative registries, 2 reliable
/// third-party, 3 informational, 4 unverified.
pub fn source_tier(source_api: &str) -> u8 {
    match source_api {
        "companies_house" | "sec_edgar" | "uspto" => 1,
        "crunchbase" | "product_hunt" | "job_postings" => 2,
        "github" | "github_activity" | "domain_rdap" | "arxiv" => 3,
        _ => 4,
    }
}

/// The gate itself. Stateless; evaluation is a pure function of the inputs.
#[derive(Debug, Clone, Default)]
pub struct VerificationGate {
    config: GateConfig,
}

impl VerificationGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate all signals for one canonical key.
    pub fn evaluate(&self, signals: &[GateSignal], now: DateTime<Utc>) -> GateOutcome {
        if signals.is_empty() {
            return GateOutcome {
                decision: Decision::Hold,
                confidence: 0.0,
                suggested_status: None,
                reason: "no signals".to_string(),
                breakdown: empty_breakdown(),
            };
        }

        // Hard-kill types override everything.
        if let Some(kill) = signals.iter().find(|s| s.signal_type.is_hard_kill()) {
            return GateOutcome {
                decision: Decision::Reject,
                confidence: 0.0,
                suggested_status: None,
                reason: format!("hard kill signal: {}", kill.signal_type),
                breakdown: empty_breakdown(),
            };
        }

        let breakdown = self.confidence(signals, now);
        let score = breakdown.overall;
        let distinct_sources = breakdown.sources.len();
        let multi_source = distinct_sources >= 2;

        let (decision, reason, suggested_status) = if score >= self.config.high_threshold
            && (multi_source || !self.config.strict_mode)
        {
            (
                Decision::AutoPush,
                format!("high confidence ({score:.2}) from {distinct_sources} source(s)"),
                Some(self.config.auto_push_status.clone()),
            )
        } else if score >= self.config.medium_threshold {
            (
                Decision::NeedsReview,
                format!("medium confidence ({score:.2})"),
                Some(self.config.needs_review_status.clone()),
            )
        } else {
            (
                Decision::Hold,
                format!("low confidence ({score:.2}), waiting for more signals"),
                None,
            )
        };

        GateOutcome {
            decision,
            confidence: score,
            suggested_status,
            reason,
            breakdown,
        }
    }

    fn confidence(&self, signals: &[GateSignal], now: DateTime<Utc>) -> ConfidenceBreakdown {
        let mut sources: Vec<String> = Vec::new();
        for s in signals {
            if !sources.contains(&s.source_api) {
                sources.push(s.source_api.clone());
            }
        }

        // Strongest contribution per signal type.
        let mut best_by_type: BTreeMap<&'static str, SignalDetail> = BTreeMap::new();
        let mut negative_multiplier = 1.0_f64;
        let mut warning_flags = 0usize;

        for signal in signals {
            warning_flags += signal.warning_flags.len();

            if let Some(multiplier) = signal.signal_type.negative_multiplier() {
                negative_multiplier *= multiplier;
                continue;
            }

            let weight = self.config.weight(signal.signal_type);
            let half_life = self.config.half_life_days(signal.signal_type);
            let age_days =
                (now - signal.detected_at).num_seconds().max(0) as f64 / 86_400.0;
            let decay_factor = 0.5_f64.powf(age_days / half_life);
            let tier_multiplier = self.config.tier_multiplier(&signal.source_api);
            let contribution = weight * decay_factor * signal.confidence * tier_multiplier;

            let detail = SignalDetail {
                id: signal.id.clone(),
                signal_type: signal.signal_type.as_str().to_string(),
                source: signal.source_api.clone(),
                weight,
                decay_factor,
                tier_multiplier,
                contribution,
                age_days,
            };

            match best_by_type.get(signal.signal_type.as_str()) {
                Some(prev) if prev.contribution >= contribution => {}
                _ => {
                    best_by_type.insert(signal.signal_type.as_str(), detail);
                }
            }
        }

        let weight_mass: f64 = best_by_type.values().map(|d| d.weight).sum();
        let contribution_sum: f64 = best_by_type.values().map(|d| d.contribution).sum();
        let base_score = if weight_mass > 0.0 {
            (contribution_sum / weight_mass) * negative_multiplier
        } else {
            0.0
        };

        let multi_source_boost = match sources.len() {
            0 | 1 => 1.0,
            2 => 1.15,
            _ => 1.30,
        };

        let distinct_types = best_by_type.len();
        let convergence_boost = match distinct_types {
            0 | 1 => 1.0,
            2 => 1.2,
            _ => 1.5,
        };

        let warning_penalty = warning_flags as f64 * WARNING_FLAG_PENALTY;
        let overall = (base_score * multi_source_boost * convergence_boost - warning_penalty)
            .clamp(0.0, CONFIDENCE_CEILING);

        ConfidenceBreakdown {
            overall,
            base_score,
            multi_source_boost,
            convergence_boost,
            warning_penalty,
            signals_contributing: distinct_types,
            sources,
            signal_details: best_by_type.into_values().collect(),
        }
    }
}

fn empty_breakdown() -> ConfidenceBreakdown {
    ConfidenceBreakdown {
        overall: 0.0,
        base_score: 0.0,
        multi_source_boost: 1.0,
        convergence_boost: 1.0,
        warning_penalty: 0.0,
        signals_contributing: 0,
        sources: Vec::new(),
        signal_details: Vec::new(),
    }
}
