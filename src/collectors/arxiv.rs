//! ArXiv collector
//!
//! Research activity in commercially relevant categories. Weak on its own;
//! valuable when the gate sees it alongside incorporation or hiring
//! evidence. The export API only speaks Atom, so entries are extracted with
//! a minimal tag scanner rather than a full XML parser.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::collectors::trait_::{CandidateSignal, Collector, LookbackWindow};
use crate::error::CollectorError;
use crate::identity::IdentityEvidence;
use crate::models::SignalType;
use crate::net::SourceClient;

const API_BASE: &str = "https://export.arxiv.org/api/query";
const CATEGORIES: &str = "cat:cs.AI+OR+cat:cs.LG+OR+cat:q-bio.QM";

pub struct ArxivCollector {
    client: SourceClient,
}

impl ArxivCollector {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct AtomEntry {
    id: String,
    title: String,
    published: Option<DateTime<Utc>>,
    first_author: Option<String>,
}

/// Pull `<entry>` blocks out of an Atom feed. Handles exactly the subset the
/// arXiv export API emits; anything unexpected is skipped.
fn parse_entries(feed: &str) -> Vec<AtomEntry> {
    feed.split("<entry>")
        .skip(1)
        .filter_map(|block| {
            let block = block.split("</entry>").next()?;
            let id = tag_text(block, "id")?;
            let title = collapse_whitespace(&tag_text(block, "title")?);
            let published = tag_text(block, "published")
                .and_then(|p| DateTime::parse_from_rfc3339(&p).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let first_author = block
                .split("<author>")
                .nth(1)
                .and_then(|author| tag_text(author, "name"));
            Some(AtomEntry {
                id,
                title,
                published,
                first_author,
            })
        })
        .collect()
}

fn tag_text(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    let text = block[start..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn entry_signal(
    entry: &AtomEntry,
    window: LookbackWindow,
    response_hash: &str,
) -> Option<CandidateSignal> {
    let published = entry.published?;
    if !window.contains(published) {
        return None;
    }
    let author = entry.first_author.clone()?;

    Some(CandidateSignal {
        signal_type: SignalType::ResearchPaper,
        confidence: 0.35,
        company_name: None,
        // The author is the only identity we have; flag it so the gate
        // discounts the match.
        evidence: IdentityEvidence::default().company_name(author.clone()),
        raw_data: serde_json::json!({
            "arxiv_id": entry.id,
            "title": entry.title,
            "first_author": author,
            "published": published,
        }),
        source_url: Some(entry.id.clone()),
        source_response_hash: Some(response_hash.to_string()),
        detected_at: published,
        warning_flags: vec!["author identity only".to_string()],
    })
}

#[async_trait]
impl Collector for ArxivCollector {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    async fn collect(
        &self,
        window: LookbackWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateSignal>, CollectorError> {
        let url = format!(
            "{API_BASE}?search_query={CATEGORIES}&sortBy=submittedDate&sortOrder=descending&max_results=50"
        );

        let body = self.client.send(self.client.get(&url), cancel).await?;
        let hash = body.sha256_hex();
        let feed = body.text();

        Ok(parse_entries(&feed)
            .iter()
            .filter_map(|entry| entry_signal(entry, window, &hash))
            .collect())
    }

    fn ping_url(&self) -> Option<String> {
        Some(format!("{API_BASE}?search_query=all:test&max_results=1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn feed(published: DateTime<Utc>) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query Results</title>
  <entry>
    <id>http://arxiv.org/abs/2503.01234v1</id>
    <title>Sample-Efficient   Robot
      Learning</title>
    <published>{}</published>
    <author><name>Jane Researcher</name></author>
    <author><name>Co Author</name></author>
  </entry>
</feed>"#,
            published.to_rfc3339()
        )
    }

    #[test]
    fn parses_entries_with_normalized_titles() {
        let entries = parse_entries(&feed(Utc::now()));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Sample-Efficient Robot Learning");
        assert_eq!(entries[0].first_author.as_deref(), Some("Jane Researcher"));
    }

    #[test]
    fn recent_paper_becomes_a_flagged_weak_signal() {
        let entries = parse_entries(&feed(Utc::now() - Duration::days(2)));
        let signal = entry_signal(&entries[0], LookbackWindow::days(7), "h").unwrap();
        assert_eq!(signal.signal_type, SignalType::ResearchPaper);
        assert_eq!(signal.warning_flags, vec!["author identity only"]);
        assert_eq!(
            signal.evidence.company_name.as_deref(),
            Some("Jane Researcher")
        );
    }

    #[test]
    fn old_papers_are_dropped() {
        let entries = parse_entries(&feed(Utc::now() - Duration::days(90)));
        assert!(entry_signal(&entries[0], LookbackWindow::days(7), "h").is_none());
    }

    #[test]
    fn malformed_feed_yields_nothing() {
        assert!(parse_entries("<feed><entry><title>no id</title></entry></feed>").is_empty());
        assert!(parse_entries("").is_empty());
    }
}
