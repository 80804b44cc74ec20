//! Optional reference lookups that ground generated prose.
//!
//! Enrichment is best effort: a lookup that errors or runs past its timeout
//! contributes nothing and generation carries on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt as _};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;
use url::Url;

use crate::config::EnrichmentConfig;
use crate::formats::Snippet;

const MAX_EXCERPT_CHARS: usize = 1200;
const ARXIV_MAX_RESULTS: usize = 3;

#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    fn name(&self) -> &str;
    async fn lookup(&self, topic: &str) -> anyhow::Result<Vec<Snippet>>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SourceReliability {
    pub reliability: &'static str,
    pub authority: &'static str,
}

pub fn source_reliability(name: &str) -> SourceReliability {
    match name.trim().to_ascii_lowercase().as_str() {
        "wikipedia" => SourceReliability {
            reliability: "high",
            authority: "crowd_sourced",
        },
        "arxiv" => SourceReliability {
            reliability: "high",
            authority: "academic",
        },
        _ => SourceReliability {
            reliability: "unknown",
            authority: "unknown",
        },
    }
}

#[derive(Clone)]
pub struct Enricher {
    lookups: Vec<Arc<dyn ReferenceLookup>>,
    enabled: bool,
    per_source_timeout: Duration,
    total_timeout: Duration,
}

impl Enricher {
    /// Wikipedia and arXiv lookups, configured from `config`.
    pub fn from_config(config: &EnrichmentConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.per_source_timeout())
            .user_agent(concat!("textbookify/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build enrichment http client")?;
        let lookups: Vec<Arc<dyn ReferenceLookup>> = vec![
            Arc::new(WikipediaLookup::new(client.clone(), &config.wikipedia_base_url)?),
            Arc::new(ArxivLookup::new(client, &config.arxiv_base_url)?),
        ];
        let mut enricher = Self::with_lookups(lookups, config);
        enricher.enabled = config.enabled;
        Ok(enricher)
    }

    pub fn with_lookups(lookups: Vec<Arc<dyn ReferenceLookup>>, config: &EnrichmentConfig) -> Self {
        Self {
            lookups,
            enabled: true,
            per_source_timeout: config.per_source_timeout(),
            total_timeout: config.total_timeout(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            lookups: Vec::new(),
            enabled: false,
            per_source_timeout: Duration::ZERO,
            total_timeout: Duration::ZERO,
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.lookups.iter().map(|l| l.name().to_owned()).collect()
    }

    /// Lazily streams snippets for `topic` from the selected sources.
    ///
    /// Empty `sources` selects every registered lookup. The stream is finite
    /// and yields in source order; each source is bounded by the per-source
    /// timeout.
    pub fn enrich(&self, topic: &str, sources: &[String]) -> impl Stream<Item = Snippet> + Send + 'static {
        let selected = if self.enabled {
            self.select(sources)
        } else {
            Vec::new()
        };
        let concurrency = selected.len().max(1);
        let timeout = self.per_source_timeout;
        let topic = topic.to_owned();

        stream::iter(selected)
            .map(move |lookup| {
                let topic = topic.clone();
                async move { lookup_bounded(lookup, &topic, timeout).await }
            })
            .buffered(concurrency)
            .flat_map(stream::iter)
    }

    /// Collects at most `limit` snippets, stopping at the total timeout.
    pub async fn gather(&self, topic: &str, sources: &[String], limit: usize) -> Vec<Snippet> {
        if limit == 0 || !self.enabled {
            return Vec::new();
        }
        let stream = self.enrich(topic, sources).take(limit);
        let mut stream = std::pin::pin!(stream);
        let deadline = tokio::time::sleep(self.total_timeout);
        let mut deadline = std::pin::pin!(deadline);

        let mut snippets = Vec::new();
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!(topic, collected = snippets.len(), "enrichment deadline reached");
                    break;
                }
                next = stream.next() => match next {
                    Some(snippet) => snippets.push(snippet),
                    None => break,
                },
            }
        }
        snippets
    }

    fn select(&self, sources: &[String]) -> Vec<Arc<dyn ReferenceLookup>> {
        if sources.is_empty() {
            return self.lookups.clone();
        }
        let mut selected = Vec::new();
        for source in sources {
            match self
                .lookups
                .iter()
                .find(|l| l.name().eq_ignore_ascii_case(source))
            {
                Some(lookup) => selected.push(Arc::clone(lookup)),
                None => tracing::debug!(source = %source, "unknown reference source ignored"),
            }
        }
        selected
    }
}

async fn lookup_bounded(
    lookup: Arc<dyn ReferenceLookup>,
    topic: &str,
    timeout: Duration,
) -> Vec<Snippet> {
    match tokio::time::timeout(timeout, lookup.lookup(topic)).await {
        Ok(Ok(snippets)) => snippets,
        Ok(Err(err)) => {
            tracing::warn!(source = lookup.name(), topic, ?err, "reference lookup failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(source = lookup.name(), topic, ?timeout, "reference lookup timed out");
            Vec::new()
        }
    }
}

/// Page summaries from the Wikipedia REST API.
#[derive(Debug, Clone)]
pub struct WikipediaLookup {
    client: reqwest::Client,
    base_url: Url,
}

impl WikipediaLookup {
    pub fn new(client: reqwest::Client, base_url: &str) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("parse wikipedia base url: {base_url}"))?;
        Ok(Self { client, base_url })
    }

    fn summary_url(&self, topic: &str) -> anyhow::Result<Url> {
        let title = topic.trim().replace(' ', "_");
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("wikipedia base url cannot have a path"))?
            .pop_if_empty()
            .extend(["api", "rest_v1", "page", "summary", title.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl ReferenceLookup for WikipediaLookup {
    fn name(&self) -> &str {
        "wikipedia"
    }

    async fn lookup(&self, topic: &str) -> anyhow::Result<Vec<Snippet>> {
        let url = self.summary_url(topic)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            anyhow::bail!("wikipedia summary failed ({})", response.status());
        }
        let value: serde_json::Value = response.json().await.context("parse wikipedia summary")?;
        Ok(parse_wikipedia_summary(&value, topic).into_iter().collect())
    }
}

pub fn parse_wikipedia_summary(value: &serde_json::Value, topic: &str) -> Option<Snippet> {
    let extract = value.get("extract")?.as_str()?.trim();
    if extract.is_empty() {
        return None;
    }
    let url = value
        .pointer("/content_urls/desktop/page")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    Some(Snippet {
        source_name: "wikipedia".to_owned(),
        excerpt: truncate_chars(extract, MAX_EXCERPT_CHARS),
        topic: topic.to_owned(),
        url,
    })
}

/// Abstracts from the arXiv Atom query API.
#[derive(Debug, Clone)]
pub struct ArxivLookup {
    client: reqwest::Client,
    base_url: Url,
}

impl ArxivLookup {
    pub fn new(client: reqwest::Client, base_url: &str) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("parse arxiv base url: {base_url}"))?;
        Ok(Self { client, base_url })
    }

    fn query_url(&self, topic: &str) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("arxiv base url cannot have a path"))?
            .pop_if_empty()
            .extend(["api", "query"]);
        url.query_pairs_mut()
            .append_pair("search_query", &format!("all:{}", topic.trim()))
            .append_pair("start", "0")
            .append_pair("max_results", &ARXIV_MAX_RESULTS.to_string());
        Ok(url)
    }
}

#[async_trait]
impl ReferenceLookup for ArxivLookup {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn lookup(&self, topic: &str) -> anyhow::Result<Vec<Snippet>> {
        let url = self.query_url(topic)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("arxiv query failed ({})", response.status());
        }
        let body = response.text().await.context("read arxiv response")?;
        Ok(parse_arxiv_feed(&body, topic))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AtomField {
    Summary,
    Id,
}

#[derive(Default)]
struct AtomEntry {
    summary: String,
    id: String,
}

impl AtomEntry {
    fn push(&mut self, field: AtomField, text: &str) {
        match field {
            AtomField::Summary => self.summary.push_str(text),
            AtomField::Id => self.id.push_str(text),
        }
    }

    fn into_snippet(self, topic: &str) -> Option<Snippet> {
        let summary = collapse_whitespace(&self.summary);
        if summary.is_empty() {
            return None;
        }
        let id = self.id.trim();
        Some(Snippet {
            source_name: "arxiv".to_owned(),
            excerpt: truncate_chars(&summary, MAX_EXCERPT_CHARS),
            topic: topic.to_owned(),
            url: (!id.is_empty()).then(|| id.to_owned()),
        })
    }
}

/// Pulls `summary` and `id` out of each Atom `entry`. Elements are matched by
/// local name so prefixed feeds (`atom:entry`) parse the same way. A malformed
/// document keeps the entries closed before the error.
pub fn parse_arxiv_feed(feed: &str, topic: &str) -> Vec<Snippet> {
    let mut reader = Reader::from_str(feed);
    let mut entries = Vec::new();
    let mut entry: Option<AtomEntry> = None;
    let mut field: Option<AtomField> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => match tag.local_name().as_ref() {
                b"entry" => {
                    entry = Some(AtomEntry::default());
                    field = None;
                }
                b"summary" if entry.is_some() && field.is_none() => {
                    field = Some(AtomField::Summary)
                }
                b"id" if entry.is_some() && field.is_none() => field = Some(AtomField::Id),
                _ => {}
            },
            Ok(Event::End(tag)) => match tag.local_name().as_ref() {
                b"entry" => {
                    entries.extend(entry.take());
                    field = None;
                }
                b"summary" if field == Some(AtomField::Summary) => field = None,
                b"id" if field == Some(AtomField::Id) => field = None,
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if let (Some(field), Some(entry)) = (field, entry.as_mut()) {
                    match text.unescape() {
                        Ok(text) => entry.push(field, &text),
                        Err(err) => tracing::debug!(%err, "skipping undecodable arxiv text"),
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if let (Some(field), Some(entry)) = (field, entry.as_mut()) {
                    entry.push(field, &String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(
                    position = reader.buffer_position(),
                    %err,
                    "arxiv feed is malformed; keeping parsed entries"
                );
                break;
            }
        }
    }

    entries
        .into_iter()
        .filter_map(|entry| entry.into_snippet(topic))
        .collect()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &input[..idx]),
        None => input.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, usize);

    #[async_trait]
    impl ReferenceLookup for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        async fn lookup(&self, topic: &str) -> anyhow::Result<Vec<Snippet>> {
            Ok((0..self.1)
                .map(|i| Snippet {
                    source_name: self.0.to_owned(),
                    excerpt: format!("{topic} fact {i}"),
                    topic: topic.to_owned(),
                    url: None,
                })
                .collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl ReferenceLookup for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn lookup(&self, _topic: &str) -> anyhow::Result<Vec<Snippet>> {
            anyhow::bail!("upstream unavailable")
        }
    }

    struct Hanging;

    #[async_trait]
    impl ReferenceLookup for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn lookup(&self, _topic: &str) -> anyhow::Result<Vec<Snippet>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    fn config(per_source_ms: u64, total_ms: u64) -> EnrichmentConfig {
        EnrichmentConfig {
            per_source_timeout_ms: per_source_ms,
            total_timeout_ms: total_ms,
            ..EnrichmentConfig::default()
        }
    }

    #[tokio::test]
    async fn failures_and_timeouts_are_swallowed() {
        let enricher = Enricher::with_lookups(
            vec![Arc::new(Failing), Arc::new(Hanging), Arc::new(Fixed("wikipedia", 2))],
            &config(50, 5_000),
        );
        let snippets: Vec<Snippet> = enricher.enrich("Cells", &[]).collect().await;
        assert_eq!(snippets.len(), 2);
        assert!(snippets.iter().all(|s| s.source_name == "wikipedia"));
    }

    #[tokio::test]
    async fn gather_respects_limit_and_selection() {
        let enricher = Enricher::with_lookups(
            vec![Arc::new(Fixed("wikipedia", 5)), Arc::new(Fixed("arxiv", 5))],
            &config(1_000, 1_000),
        );
        let snippets = enricher.gather("Cells", &["ARXIV".to_owned(), "oer".to_owned()], 3).await;
        assert_eq!(snippets.len(), 3);
        assert!(snippets.iter().all(|s| s.source_name == "arxiv"));
        assert!(enricher.gather("Cells", &[], 0).await.is_empty());
    }

    #[tokio::test]
    async fn gather_stops_at_total_deadline() {
        let enricher = Enricher::with_lookups(vec![Arc::new(Hanging)], &config(10_000, 50));
        let started = std::time::Instant::now();
        assert!(enricher.gather("Cells", &[], 3).await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn disabled_enricher_yields_nothing() {
        let snippets: Vec<Snippet> = Enricher::disabled().enrich("Cells", &[]).collect().await;
        assert!(snippets.is_empty());
    }

    #[test]
    fn parses_wikipedia_summary() {
        let value = serde_json::json!({
            "title": "Cell biology",
            "extract": "Cell biology studies cells.",
            "content_urls": { "desktop": { "page": "https://en.wikipedia.org/wiki/Cell_biology" } }
        });
        let snippet = parse_wikipedia_summary(&value, "Cell Biology").unwrap();
        assert_eq!(snippet.excerpt, "Cell biology studies cells.");
        assert_eq!(
            snippet.url.as_deref(),
            Some("https://en.wikipedia.org/wiki/Cell_biology")
        );
        assert!(parse_wikipedia_summary(&serde_json::json!({"extract": ""}), "x").is_none());
    }

    #[test]
    fn parses_arxiv_entries() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/1234.5678v1</id>
    <title>Membranes</title>
    <summary>  Lipid   bilayers &amp; proteins.
    </summary>
  </entry>
  <entry><id>x</id><summary></summary></entry>
</feed>"#;
        let snippets = parse_arxiv_feed(feed, "Cells");
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].excerpt, "Lipid bilayers & proteins.");
        assert_eq!(snippets[0].url.as_deref(), Some("http://arxiv.org/abs/1234.5678v1"));
    }

    #[test]
    fn arxiv_feed_decodes_cdata_and_character_references() {
        let feed = r#"<?xml version="1.0" encoding="UTF-8"?>
<atom:feed xmlns:atom="http://www.w3.org/2005/Atom">
  <atom:id>http://arxiv.org/api/query</atom:id>
  <atom:entry>
    <atom:id>http://arxiv.org/abs/2401.00001v2</atom:id>
    <atom:summary>Caf&#233; kinetics &#x2014; <![CDATA[rates <k> & yields]]></atom:summary>
  </atom:entry>
  <atom:entry>
    <atom:summary>No identifier here.</atom:summary>
  </atom:entry>
</atom:feed>"#;
        let snippets = parse_arxiv_feed(feed, "Kinetics");
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].excerpt, "Caf\u{e9} kinetics \u{2014} rates <k> & yields");
        assert_eq!(snippets[0].url.as_deref(), Some("http://arxiv.org/abs/2401.00001v2"));
        assert_eq!(snippets[0].topic, "Kinetics");
        assert_eq!(snippets[1].url, None);
    }

    #[test]
    fn truncated_arxiv_feed_keeps_closed_entries() {
        let feed = "<feed><entry><id>a</id><summary>First.</summary></entry>\
                    <entry><id>b</id><summary>Second</wrong></entry></feed>";
        let snippets = parse_arxiv_feed(feed, "Cells");
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].excerpt, "First.");
    }

    #[test]
    fn labels_known_sources() {
        assert_eq!(source_reliability("Wikipedia").authority, "crowd_sourced");
        assert_eq!(source_reliability("arxiv").authority, "academic");
        assert_eq!(source_reliability("blog").reliability, "unknown");
    }

    #[test]
    fn wikipedia_url_encodes_title() {
        let lookup = WikipediaLookup::new(reqwest::Client::new(), "http://127.0.0.1:1/").unwrap();
        let url = lookup.summary_url("Cell Biology/Intro").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:1/api/rest_v1/page/summary/Cell_Biology%2FIntro"
        );
    }
}
