//! Canonical key service.
//!
//! Produces deterministic, normalized identity keys for a company from
//! whatever partial evidence a collector obtained. A key is a tagged string
//! `<kind>:<normalized-value>`. Candidates come back strongest first:
//!
//! 1. `domain`: registrable domain of the website (most stable)
//! 2. `companies_house`: authoritative UK filing number
//! 3. `crunchbase`: stable provider id
//! 4. `pitchbook`: stable provider id
//! 5. `github_org`: companies change orgs
//! 6. `github_repo`: repos get renamed
//! 7. `name_loc`: last resort for stealth companies, never auto-merged
//!
//! Everything here is pure; no I/O.

use std::fmt;

use crate::error::IdentityError;

/// The kind prefix of a canonical key, in strength order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
    Domain,
    CompaniesHouse,
    Crunchbase,
    Pitchbook,
    GithubOrg,
    GithubRepo,
    NameLoc,
}

impl KeyKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            KeyKind::Domain => "domain",
            KeyKind::CompaniesHouse => "companies_house",
            KeyKind::Crunchbase => "crunchbase",
            KeyKind::Pitchbook => "pitchbook",
            KeyKind::GithubOrg => "github_org",
            KeyKind::GithubRepo => "github_repo",
            KeyKind::NameLoc => "name_loc",
        }
    }

    /// Strong keys may be merged automatically across signals; weak keys
    /// need corroboration first (enforced by the gate, not here).
    pub const fn is_strong(self) -> bool {
        matches!(
            self,
            KeyKind::Domain | KeyKind::CompaniesHouse | KeyKind::Crunchbase | KeyKind::Pitchbook
        )
    }

    /// Relative reliability when choosing which key to trust in a merge.
    pub const fn strength_score(self) -> u32 {
        match self {
            KeyKind::Domain => 100,
            KeyKind::CompaniesHouse => 95,
            KeyKind::Crunchbase => 80,
            KeyKind::Pitchbook => 80,
            KeyKind::GithubOrg => 50,
            KeyKind::GithubRepo => 40,
            KeyKind::NameLoc => 10,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "domain" => Some(KeyKind::Domain),
            "companies_house" => Some(KeyKind::CompaniesHouse),
            "crunchbase" => Some(KeyKind::Crunchbase),
            "pitchbook" => Some(KeyKind::Pitchbook),
            "github_org" => Some(KeyKind::GithubOrg),
            "github_repo" => Some(KeyKind::GithubRepo),
            "name_loc" => Some(KeyKind::NameLoc),
            _ => None,
        }
    }
}

/// A tagged, normalized company identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    fn new(kind: KeyKind, value: &str) -> Self {
        Self(format!("{}:{}", kind.as_str(), value))
    }

    /// Parse a stored key string. Returns `None` for unrecognized prefixes.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, value) = raw.split_once(':')?;
        let kind = KeyKind::parse(prefix)?;
        if value.len() < 2 {
            return None;
        }
        Some(Self::new(kind, value))
    }

    pub fn kind(&self) -> KeyKind {
        let prefix = self.0.split(':').next().unwrap_or_default();
        KeyKind::parse(prefix).expect("canonical key constructed with a valid kind")
    }

    pub fn is_strong(&self) -> bool {
        self.kind().is_strong()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partial identifiers a collector extracted for one company.
#[derive(Debug, Clone, Default)]
pub struct IdentityEvidence {
    pub website: Option<String>,
    pub companies_house_number: Option<String>,
    pub crunchbase_id: Option<String>,
    pub pitchbook_id: Option<String>,
    pub github_org: Option<String>,
    pub github_repo: Option<String>,
    pub company_name: Option<String>,
    pub region: Option<String>,
}

impl IdentityEvidence {
    pub fn website(mut self, value: impl Into<String>) -> Self {
        self.website = Some(value.into());
        self
    }

    pub fn companies_house_number(mut self, value: impl Into<String>) -> Self {
        self.companies_house_number = Some(value.into());
        self
    }

    pub fn crunchbase_id(mut self, value: impl Into<String>) -> Self {
        self.crunchbase_id = Some(value.into());
        self
    }

    pub fn pitchbook_id(mut self, value: impl Into<String>) -> Self {
        self.pitchbook_id = Some(value.into());
        self
    }

    pub fn github_org(mut self, value: impl Into<String>) -> Self {
        self.github_org = Some(value.into());
        self
    }

    pub fn github_repo(mut self, value: impl Into<String>) -> Self {
        self.github_repo = Some(value.into());
        self
    }

    pub fn company_name(mut self, value: impl Into<String>) -> Self {
        self.company_name = Some(value.into());
        self
    }

    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = Some(value.into());
        self
    }
}

/// Derive the ordered, deduplicated candidate list, strongest first.
///
/// Fails with [`IdentityError::InsufficientEvidence`] when nothing in the
/// bag normalizes to a usable value.
pub fn key_candidates(evidence: &IdentityEvidence) -> Result<Vec<CanonicalKey>, IdentityError> {
    let mut out: Vec<CanonicalKey> = Vec::new();

    let mut push = |kind: KeyKind, value: String| {
        if value.len() < 2 {
            return;
        }
        let key = CanonicalKey::new(kind, &value);
        if !out.contains(&key) {
            out.push(key);
        }
    };

    if let Some(website) = evidence.website.as_deref() {
        if let Some(domain) = normalize_domain(website) {
            push(KeyKind::Domain, domain);
        }
    }
    if let Some(number) = evidence.companies_house_number.as_deref() {
        push(KeyKind::CompaniesHouse, normalize_company_number(number));
    }
    if let Some(id) = evidence.crunchbase_id.as_deref() {
        push(KeyKind::Crunchbase, normalize_provider_id(id));
    }
    if let Some(id) = evidence.pitchbook_id.as_deref() {
        push(KeyKind::Pitchbook, normalize_provider_id(id));
    }
    if let Some(org) = evidence.github_org.as_deref() {
        push(KeyKind::GithubOrg, slug(org));
    }
    if let Some(repo) = evidence.github_repo.as_deref() {
        if let Some(normalized) = normalize_github_repo(repo) {
            push(KeyKind::GithubRepo, normalized);
        }
    }
    if let Some(name) = evidence.company_name.as_deref() {
        let name_slug = slug(name);
        if name_slug.len() >= 2 {
            let value = match evidence.region.as_deref().map(slug) {
                Some(region) if !region.is_empty() => format!("{}|{}", name_slug, region),
                _ => name_slug,
            };
            push(KeyKind::NameLoc, value);
        }
    }

    if out.is_empty() {
        return Err(IdentityError::InsufficientEvidence);
    }
    Ok(out)
}

/// The single best key for the evidence bag.
pub fn primary_key(evidence: &IdentityEvidence) -> Result<CanonicalKey, IdentityError> {
    Ok(key_candidates(evidence)?.remove(0))
}

/// Normalize a website or domain-ish string to its registrable domain.
///
/// Strips scheme, credentials, port, path, leading dots and a `www.` prefix,
/// then reduces `host.sub.example.co.uk`-style names to the registrable
/// suffix. Returns `None` for values with no dot.
pub fn normalize_domain(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let host = url::Url::parse(&with_scheme)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))?;

    let mut host = host.trim_matches('.').to_ascii_lowercase();
    if let Some(stripped) = host.strip_prefix("www.") {
        host = stripped.to_string();
    }

    if !host.contains('.') {
        return None;
    }

    Some(registrable_domain(&host))
}

// Multi-label public suffixes we see in practice. A full suffix list is out
// of proportion for dedup keys; unknown suffixes fall back to the last two
// labels.
const TWO_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "net.uk", "com.au", "net.au", "org.au",
    "co.nz", "co.jp", "co.in", "co.kr", "com.br", "com.cn", "com.sg", "com.hk",
];

fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }

    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };

    labels[labels.len().saturating_sub(keep)..].join(".")
}

/// Normalize UK Companies House numbers (and similar registries): keep
/// alphanumerics, lowercase.
pub fn normalize_company_number(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Provider ids (Crunchbase, PitchBook) vary by export; trim and lowercase.
pub fn normalize_provider_id(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Lowercase, keep `[a-z0-9]` runs, collapse separators to `-`.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = true;
    for c in value.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Normalize a GitHub repo to `org/repo` slugs. Accepts `Org/Repo` or a
/// github.com URL.
pub fn normalize_github_repo(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let path = if trimmed.contains("github.com") {
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };
        url::Url::parse(&with_scheme).ok()?.path().to_string()
    } else {
        trimmed.to_string()
    };

    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let org = slug(parts.next()?);
    let repo = slug(parts.next()?);
    if org.is_empty() || repo.is_empty() {
        return None;
    }
    Some(format!("{}/{}", org, repo))
}
