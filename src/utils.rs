//! Utility functions for time classification, URL and text handling, and file system checks.
//!
//! This module provides helpers used throughout the pipeline:
//! - Edition naming from the time of day
//! - URL normalisation (tracking parameters) and publisher keys
//! - HTML stripping and length bounding for titles and summaries
//! - Output directory validation

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

static TRACKING_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(utm_.*|fbclid|gclid|mc_cid|mc_eid|ref|src)$").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Classify a local time into morning, afternoon, or evening.
///
/// - **Morning**: 00:00 - 08:00
/// - **Afternoon**: 08:00 - 16:00
/// - **Evening**: 16:00 - 24:00
pub fn edition_for(tod: NaiveTime) -> &'static str {
    match tod.hour() {
        0..=7 => "morning",
        8..=15 => "afternoon",
        _ => "evening",
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a char boundary at or below `max` bytes with an
/// ellipsis and byte count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Convert a title to a URL-friendly slug.
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World"), "hello-world");
/// ```
pub fn slugify_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-' && c != '_', "")
        .replace([' ', '_'], "-")
}

/// Strip tracking query parameters and the fragment from a URL.
///
/// Unparseable input is returned unchanged.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAM.is_match(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);
    url.to_string()
}

/// Publisher key for a URL: lowercase host with `www.` removed.
///
/// For example `https://www.Reuters.com/x` gives `reuters.com`.
pub fn domain_key(raw: &str) -> String {
    match Url::parse(raw).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
        Some(host) => host.strip_prefix("www.").map(str::to_string).unwrap_or(host),
        None => raw.to_lowercase(),
    }
}

/// Stable article id: first 8 bytes of SHA-256 over the canonical URL, hex encoded.
pub fn article_id(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Remove markup from an HTML fragment and fold whitespace.
pub fn strip_html(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return WHITESPACE.replace_all(html.trim(), " ").into_owned();
    }
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Bound a string to `max` characters, appending `…` when cut.
pub fn bound_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

/// Hours between two instants as a float, never negative.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    ((later - earlier).num_seconds().max(0) as f64) / 3600.0
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if missing, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
