//! Canonical registry of supported `Signal.signal_type` values.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    Incorporation,
    FundingEvent,
    GithubSpike,
    GithubActivity,
    DomainRegistration,
    PatentFiling,
    ProductLaunch,
    HnMention,
    ResearchPaper,
    JobPosting,
    SocialAnnouncement,
    CofounderSearch,
    CompanyDissolved,
    DomainDead,
    GithubInactive,
}

impl SignalType {
    /// Return the canonical string representation for this type.
    pub const fn as_str(self) -> &'static str {
        match self {
            SignalType::Incorporation => "incorporation",
            SignalType::FundingEvent => "funding_event",
            SignalType::GithubSpike => "github_spike",
            SignalType::GithubActivity => "github_activity",
            SignalType::DomainRegistration => "domain_registration",
            SignalType::PatentFiling => "patent_filing",
            SignalType::ProductLaunch => "product_launch",
            SignalType::HnMention => "hn_mention",
            SignalType::ResearchPaper => "research_paper",
            SignalType::JobPosting => "job_posting",
            SignalType::SocialAnnouncement => "social_announcement",
            SignalType::CofounderSearch => "cofounder_search",
            SignalType::CompanyDissolved => "company_dissolved",
            SignalType::DomainDead => "domain_dead",
            SignalType::GithubInactive => "github_inactive",
        }
    }

    /// A hard-kill type unconditionally routes the prospect to reject.
    pub const fn is_hard_kill(self) -> bool {
        matches!(self, SignalType::CompanyDissolved)
    }

    /// Negative types do not add evidence; they scale the base score down.
    /// Returns the multiplier, or `None` for positive types.
    pub const fn negative_multiplier(self) -> Option<f64> {
        match self {
            SignalType::CompanyDissolved => Some(0.0),
            SignalType::DomainDead => Some(0.1),
            SignalType::GithubInactive => Some(0.3),
            _ => None,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = UnknownSignalType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_SIGNAL_TYPES
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownSignalType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown signal type: {0}")]
pub struct UnknownSignalType(pub String);

/// Complete registry of canonical types.
pub const ALL_SIGNAL_TYPES: &[SignalType] = &[
    SignalType::Incorporation,
    SignalType::FundingEvent,
    SignalType::GithubSpike,
    SignalType::GithubActivity,
    SignalType::DomainRegistration,
    SignalType::PatentFiling,
    SignalType::ProductLaunch,
    SignalType::HnMention,
    SignalType::ResearchPaper,
    SignalType::JobPosting,
    SignalType::SocialAnnouncement,
    SignalType::CofounderSearch,
    SignalType::CompanyDissolved,
    SignalType::DomainDead,
    SignalType::GithubInactive,
];
