//! Normalizer: raw feed entries into uniform, pre-cluster [`Article`]s.

use crate::config::{PipelineConfig, SourceTables};
use crate::fetcher::acceptable_image;
use crate::models::{Article, Priority, RawEntry, ScoreBreakdown};
use crate::utils::{article_id, bound_chars, domain_key, normalize_url, strip_html};
use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

/// Outlet suffixes longer than this are treated as part of the headline.
const MAX_OUTLET_SUFFIX: usize = 50;

/// Split `"Headline - Outlet"` into its parts when the suffix is short.
pub fn split_outlet_suffix(title: &str) -> (&str, Option<&str>) {
    match title.rsplit_once(" - ") {
        Some((head, tail))
            if !head.trim().is_empty() && !tail.trim().is_empty() && tail.chars().count() < MAX_OUTLET_SUFFIX =>
        {
            (head.trim(), Some(tail.trim()))
        }
        _ => (title.trim(), None),
    }
}

/// Normalise one entry. `None` when the entry has no usable http(s) link.
pub fn normalize(
    raw: RawEntry,
    fetched_at: DateTime<Utc>,
    tables: &SourceTables,
    config: &PipelineConfig,
) -> Option<Article> {
    let canonical_url = normalize_url(&raw.link);
    match Url::parse(&canonical_url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
        _ => {
            debug!(link = %raw.link, "Entry with unusable link dropped");
            return None;
        }
    }

    let source = domain_key(&canonical_url);
    let plain_title = strip_html(&raw.title);
    let (head, suffix) = split_outlet_suffix(&plain_title);
    let title = if head.is_empty() { "Untitled" } else { head };

    // Aggregator entries only know the domain; the suffix is the real outlet name.
    let outlet = match suffix {
        Some(name) if raw.outlet == source || raw.outlet.is_empty() => name.to_string(),
        _ if raw.outlet.is_empty() => source.clone(),
        _ => raw.outlet.clone(),
    };

    let (published_at, date_estimated) = match raw.published_at {
        Some(ts) => (ts, false),
        None => (fetched_at, true),
    };

    Some(Article {
        id: article_id(&canonical_url),
        title: bound_chars(title, config.title_max_chars),
        reputation_tier: tables.tier_for(&source),
        summary_text: bound_chars(&strip_html(&raw.summary_html), config.summary_max_chars),
        image_url: raw.image_url.filter(|u| acceptable_image(u)),
        categories: Vec::new(),
        declared_category: raw.source.declared_category.clone(),
        score: 0.0,
        breakdown: ScoreBreakdown::default(),
        priority: Priority::Normal,
        cluster_id: String::new(),
        alternate_links: Vec::new(),
        why_matters: String::new(),
        canonical_url,
        published_at,
        date_estimated,
        source,
        outlet,
    })
}

/// Normalise a batch, dropping unusable entries.
pub fn normalize_all(
    entries: Vec<RawEntry>,
    fetched_at: DateTime<Utc>,
    tables: &SourceTables,
    config: &PipelineConfig,
) -> Vec<Article> {
    entries
        .into_iter()
        .filter_map(|raw| normalize(raw, fetched_at, tables, config))
        .collect()
}
