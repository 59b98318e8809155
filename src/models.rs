//! Data models shared by every pipeline stage.
//!
//! - [`Source`] / [`FeedEndpoint`]: what we were asked to read
//! - [`RawEntry`]: one feed item as fetched, before normalisation
//! - [`Article`]: the central record that flows through clustering,
//!   classification, scoring and selection
//! - [`SelectionResult`] / [`RunStats`]: what a run hands back to the caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Static credibility rank of a publisher.
///
/// Variants are declared lowest first so the derived `Ord` gives
/// `Top > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationTier {
    #[default]
    Low,
    Medium,
    High,
    Top,
}

impl ReputationTier {
    /// Normalised [0,1] reputation sub-score.
    pub fn weight(self) -> f64 {
        match self {
            ReputationTier::Top => 1.0,
            ReputationTier::High => 0.85,
            ReputationTier::Medium => 0.65,
            ReputationTier::Low => 0.45,
        }
    }
}

impl fmt::Display for ReputationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReputationTier::Top => "top",
            ReputationTier::High => "high",
            ReputationTier::Medium => "medium",
            ReputationTier::Low => "low",
        };
        f.write_str(s)
    }
}

/// One line of the source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    /// Category hint given after the URL in the source list.
    pub declared_category: Option<String>,
    pub reputation_tier: ReputationTier,
}

/// A concrete feed URL derived from a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    pub canonical_url: String,
    pub parent_source: Source,
}

/// A feed item as fetched, links already resolved to the publisher URL.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub summary_html: String,
    /// Image URL supplied by the feed itself (media:content, enclosure, ...).
    pub image_url: Option<String>,
    /// Display name of the outlet (feed title or domain).
    pub outlet: String,
    pub source: Source,
}

/// A link to the same story from another outlet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateLink {
    pub source: String,
    pub outlet: String,
    pub url: String,
}

/// A category assignment with its confidence in [0,1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTag {
    pub key: String,
    pub confidence: f64,
}

/// Priority badge shown next to a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Breaking,
    Important,
    #[default]
    Normal,
}

/// Individual [0,1] sub-scores that make up [`Article::score`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub recency: f64,
    pub reputation: f64,
    pub importance: f64,
    pub sentiment: f64,
    pub corroboration: f64,
}

/// The central record of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Stable hash of `canonical_url`.
    pub id: String,
    pub title: String,
    pub canonical_url: String,
    /// Always UTC. Fetch time when the feed gave no date.
    pub published_at: DateTime<Utc>,
    /// True when `published_at` is the fetch-time fallback.
    #[serde(default)]
    pub date_estimated: bool,
    /// Publisher key (registrable host, `www.` stripped).
    pub source: String,
    pub outlet: String,
    pub reputation_tier: ReputationTier,
    pub summary_text: String,
    pub image_url: Option<String>,
    /// Primary category first. Never empty once classified.
    #[serde(default)]
    pub categories: Vec<CategoryTag>,
    #[serde(default)]
    pub declared_category: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub breakdown: ScoreBreakdown,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub alternate_links: Vec<AlternateLink>,
    /// One-line context for the primary category.
    #[serde(default)]
    pub why_matters: String,
}

impl Article {
    /// Key of the highest-confidence category, `None` before classification.
    pub fn primary_category(&self) -> Option<&str> {
        self.categories.first().map(|c| c.key.as_str())
    }

    pub fn has_category(&self, key: &str) -> bool {
        self.categories.iter().any(|c| c.key == key)
    }
}

/// Per-category counts and the compact-rendering decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub main: usize,
    pub other: usize,
    /// Render as a grouped compact list instead of full-width cards.
    pub compact: bool,
}

/// Output of the Selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionResult {
    pub main: Vec<Article>,
    pub other: Vec<Article>,
    pub category_counts: Vec<CategoryCount>,
    /// True when the per-source cap was relaxed to reach `other_min`.
    pub diversity_relaxed: bool,
}

/// A source that produced no feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub url: String,
    pub reason: String,
}

/// A feed that failed to fetch or parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFailure {
    pub url: String,
    pub error: String,
}

/// Observability counters returned by every run, successful or not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub sources_attempted: usize,
    pub sources_resolved: usize,
    pub sources_skipped: usize,
    pub feeds_attempted: usize,
    pub feeds_succeeded: usize,
    pub feeds_failed: usize,
    pub entries_fetched: usize,
    pub articles_in_window: usize,
    pub unique_urls: usize,
    pub clusters: usize,
    pub multi_source_clusters: usize,
    pub images_enriched: usize,
    pub skipped_sources: Vec<SkippedSource>,
    pub failed_feeds: Vec<FeedFailure>,
}
