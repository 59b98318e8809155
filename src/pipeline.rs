//! End-to-end curation run.
//!
//! registry → fetch → normalize → cluster → classify → filter → score →
//! select → image enrichment → report. Every stage below this function logs
//! and records its own failures; `run` itself never fails.

use crate::cache::RunCaches;
use crate::classify::{Classifier, EntityExtractor};
use crate::cluster::cluster;
use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::http::HttpClient;
use crate::models::{Article, RunStats, Source};
use crate::normalize::normalize_all;
use crate::report::{Report, build_report};
use crate::score::Scorer;
use crate::select::select;
use crate::sources::Registry;
use crate::state::LookbackWindow;
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Result of one run, including the empty-result case.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: Report,
    /// At least one feed was fetched and parsed. Gates the run-state update.
    pub fetch_succeeded: bool,
}

impl RunOutcome {
    pub fn stats(&self) -> &RunStats {
        &self.report.stats
    }
}

/// Known category keys out of `requested`. `None` means no filtering.
pub fn resolve_category_filter(requested: &[String], config: &Config) -> Option<HashSet<String>> {
    if requested.is_empty() {
        return None;
    }
    let mut known = HashSet::new();
    for key in requested.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
        if config.category(key).is_some() || key == config.classifier.residual_category {
            known.insert(key.to_string());
        } else {
            warn!(category = %key, "Ignoring unknown category in filter");
        }
    }
    if known.is_empty() {
        warn!("No known categories in filter; using all categories");
        return None;
    }
    Some(known)
}

/// Run the whole pipeline once over `sources`.
///
/// Stages run in a fixed order and each one isolates its own failures, so a
/// run with every feed down still yields an (empty) report.
///
/// # Arguments
///
/// * `sources` - Parsed source list
/// * `config` - Merged configuration, presets and CLI overrides applied
/// * `client` - HTTP client for discovery, feeds and image enrichment
/// * `extractor` - Entity extractor used when precision mode is on
/// * `window` - Lookback window; `window.end` is the run's "now"
/// * `category_filter` - Primary categories to keep; empty keeps all
/// * `local_now` - Local wall-clock time for the report date and edition
///
/// # Returns
///
/// A [`RunOutcome`] holding the report and whether any feed was fetched.
#[instrument(level = "info", skip_all, fields(sources = sources.len(), window_hours = window.hours))]
pub async fn run<C: HttpClient, E: EntityExtractor>(
    sources: &[Source],
    config: &Config,
    client: &C,
    extractor: E,
    window: LookbackWindow,
    category_filter: &[String],
    local_now: NaiveDateTime,
) -> RunOutcome {
    let t0 = Instant::now();
    let now = window.end;
    let window_hours = window.hours as f64;
    let mut stats = RunStats {
        sources_attempted: sources.len(),
        ..Default::default()
    };

    let resolution = Registry::new(client, config).load(sources, window.days()).await;
    stats.sources_skipped = resolution.skipped.len();
    stats.sources_resolved = sources.len().saturating_sub(resolution.skipped.len());
    stats.skipped_sources = resolution.skipped;

    let caches = RunCaches::default();
    let fetcher = Fetcher::new(client, &caches, &config.pipeline);
    let fetched = fetcher.fetch_all(&resolution.endpoints, window.start, now).await;
    stats.feeds_attempted = fetched.feeds_attempted;
    stats.feeds_succeeded = fetched.feeds_succeeded;
    stats.feeds_failed = fetched.failures.len();
    stats.failed_feeds = fetched.failures;
    stats.entries_fetched = fetched.entries_seen;
    let fetch_succeeded = fetched.feeds_succeeded > 0;

    let articles: Vec<Article> = normalize_all(fetched.entries, now, &config.sources, &config.pipeline)
        .into_iter()
        .filter(|a| window.contains(a.published_at))
        .collect();
    stats.articles_in_window = articles.len();
    if articles.is_empty() {
        warn!(feeds_succeeded = stats.feeds_succeeded, "No articles inside the lookback window");
    }

    let clustered = cluster(articles, &config.clustering, now, window_hours);
    stats.unique_urls = clustered.unique_urls;
    stats.clusters = clustered.clusters;
    stats.multi_source_clusters = clustered.multi_source_clusters;
    let mut representatives = clustered.representatives;

    Classifier::new(config, extractor).classify_all(&mut representatives);

    if let Some(keep) = resolve_category_filter(category_filter, config) {
        let before = representatives.len();
        representatives.retain(|a| a.primary_category().is_some_and(|c| keep.contains(c)));
        info!(before, after = representatives.len(), "Category filter applied");
    }

    Scorer::new(&config.scoring, now, window_hours).score_all(&mut representatives);

    let order: Vec<String> = config
        .categories
        .iter()
        .map(|c| c.key.clone())
        .chain(std::iter::once(config.classifier.residual_category.clone()))
        .collect();
    let mut selection = select(representatives, &config.selection, &order);

    stats.images_enriched = fetcher.enrich_images(&mut selection.main).await;
    stats.images_enriched += fetcher.enrich_images(&mut selection.other).await;

    let report = build_report(selection, config, window, stats, local_now);
    info!(
        elapsed_ms = t0.elapsed().as_millis() as u64,
        redirect_cache = caches.redirects.len(),
        image_cache = caches.images.len(),
        cache_hits = caches.redirects.hits() + caches.images.hits(),
        fetch_succeeded,
        "Pipeline finished"
    );
    RunOutcome {
        report,
        fetch_succeeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::NoopExtractor;
    use crate::http::fake::FakeClient;
    use crate::models::ReputationTier;
    use crate::sources::parse_source_list;
    use crate::state::compute_window;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use std::collections::HashSet;

    const WIRE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Reuters</title>
  <item>
    <title>Company X raises $50M in Series B funding</title>
    <link>https://www.reuters.com/tech/company-x</link>
    <pubDate>Mon, 10 Mar 2025 10:00:00 GMT</pubDate>
    <description>Company X said on Monday it raised $50 million.</description>
  </item>
  <item>
    <title>Fed raises interest rates by a quarter point</title>
    <link>https://www.reuters.com/markets/fed</link>
    <pubDate>Mon, 10 Mar 2025 09:00:00 GMT</pubDate>
    <description>The Federal Reserve raised rates.</description>
  </item>
  <item>
    <title>Last week's news</title>
    <link>https://www.reuters.com/old</link>
    <pubDate>Sat, 01 Mar 2025 09:00:00 GMT</pubDate>
  </item>
</channel></rss>"#;

    const BLOG_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Example Blog</title>
  <item>
    <title>Company X raises $50M in Series B funding round</title>
    <link>https://blog.example.com/company-x?utm_source=rss</link>
    <pubDate>Mon, 10 Mar 2025 10:10:00 GMT</pubDate>
    <description>The startup Company X closed a $50 million round.</description>
  </item>
  <item>
    <title>Town hall extends weekend opening hours</title>
    <link>https://blog.example.com/town-hall</link>
    <description>The town hall will open on Sundays.</description>
  </item>
</channel></rss>"#;

    const SOURCES: &str = "\
# wire services
https://feeds.reuters.com/news.xml
https://blog.example.com/feed.xml
https://down.example.org/rss.xml
";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn local() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn client() -> FakeClient {
        FakeClient::new()
            .with("https://feeds.reuters.com/news.xml", "application/rss+xml", WIRE_FEED)
            .with("https://blog.example.com/feed.xml", "application/rss+xml", BLOG_FEED)
            .with(
                "https://www.reuters.com/tech/company-x",
                "text/html",
                r#"<html><head><meta property="og:image" content="https://cdn.reuters.com/x.jpg"></head></html>"#,
            )
    }

    #[tokio::test]
    async fn test_end_to_end_run() {
        let config = Config::default();
        let sources = parse_source_list(SOURCES, &config);
        let window = compute_window(now(), None, None, &config.pipeline);
        let client = client();

        let outcome = run(&sources, &config, &client, NoopExtractor, window, &[], local()).await;
        assert!(outcome.fetch_succeeded);

        let stats = outcome.stats();
        assert_eq!(stats.sources_attempted, 3);
        assert_eq!(stats.feeds_attempted, 3);
        assert_eq!(stats.feeds_succeeded, 2);
        assert_eq!(stats.feeds_failed, 1);
        assert_eq!(stats.failed_feeds[0].url, "https://down.example.org/rss.xml");
        assert_eq!(stats.articles_in_window, 4);
        assert_eq!(stats.clusters, 3);
        assert_eq!(stats.multi_source_clusters, 1);
        assert_eq!(stats.images_enriched, 1);

        let report = &outcome.report;
        let articles: Vec<&Article> = report.articles().collect();
        assert_eq!(articles.len(), 3);

        let urls: HashSet<&str> = articles.iter().map(|a| a.canonical_url.as_str()).collect();
        assert_eq!(urls.len(), articles.len());
        assert!(articles.iter().all(|a| window.contains(a.published_at)));
        assert!(articles.iter().all(|a| !a.categories.is_empty()));

        let company = articles.iter().find(|a| a.title.starts_with("Company X")).unwrap();
        assert_eq!(company.source, "reuters.com");
        assert_eq!(company.reputation_tier, ReputationTier::Top);
        assert_eq!(company.alternate_links.len(), 1);
        assert_eq!(company.alternate_links[0].url, "https://blog.example.com/company-x");
        assert_eq!(company.image_url.as_deref(), Some("https://cdn.reuters.com/x.jpg"));

        let fed = articles.iter().find(|a| a.title.starts_with("Fed")).unwrap();
        assert!(!fed.has_category("ai_headlines"));
        assert_eq!(fed.primary_category(), Some("finance_markets"));

        let town = articles.iter().find(|a| a.title.starts_with("Town hall")).unwrap();
        assert!(town.date_estimated);
        assert_eq!(town.primary_category(), Some("general"));
    }

    #[tokio::test]
    async fn test_category_filter() {
        let config = Config::default();
        let sources = parse_source_list(SOURCES, &config);
        let window = compute_window(now(), None, None, &config.pipeline);
        let filter = vec!["finance_markets".to_string(), "nonsense".to_string()];

        let outcome = run(&sources, &config, &client(), NoopExtractor, window, &filter, local()).await;
        let titles: Vec<&str> = outcome.report.articles().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Fed raises interest rates by a quarter point"]);
    }

    #[tokio::test]
    async fn test_all_feeds_down_is_an_empty_not_a_crash() {
        let config = Config::default();
        let sources = parse_source_list(SOURCES, &config);
        let window = compute_window(now(), None, Some(24), &config.pipeline);

        let outcome = run(&sources, &config, &FakeClient::new(), NoopExtractor, window, &[], local()).await;
        assert!(!outcome.fetch_succeeded);
        assert!(outcome.report.is_empty());
        assert_eq!(outcome.stats().feeds_failed, 3);
    }

    #[test]
    fn test_resolve_category_filter() {
        let config = Config::default();
        assert_eq!(resolve_category_filter(&[], &config), None);
        assert_eq!(resolve_category_filter(&["bogus".into()], &config), None);
        let keep = resolve_category_filter(&["cybersecurity".into(), "general".into(), "x".into()], &config).unwrap();
        assert_eq!(keep.len(), 2);
    }
}
