//! Configuration: embedded defaults, optional user overrides, validation.
//!
//! All curation tables (reputation tiers, category keywords, exclusions,
//! importance keywords, entity map) are plain data in `config/default.yaml`.
//! A user file is merged over the defaults before deserialisation, so a
//! config that only sets `selection.top_n` keeps every other default.

use crate::error::ConfigError;
use crate::models::ReputationTier;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_YAML: &str = include_str!("../config/default.yaml");

/// Complete runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub clustering: ClusterConfig,
    pub scoring: ScoringConfig,
    pub selection: SelectionConfig,
    pub classifier: ClassifierConfig,
    pub sources: SourceTables,
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    /// Named bundles of run settings, selected with `--preset`.
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
}

/// Fetch-side tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub workers: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_entries_per_feed: usize,
    pub max_feeds_per_domain: usize,
    pub default_lookback_hours: i64,
    pub min_lookback_hours: i64,
    pub max_lookback_days: i64,
    pub google_news_fallback: bool,
    /// Extra attempts after a transport error or a transient 5xx.
    #[serde(default = "three")]
    pub max_retries: usize,
    #[serde(default = "retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    pub image_enrich_limit: usize,
    pub title_max_chars: usize,
    pub summary_max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cosine similarity at or above which two articles are one story.
    pub similarity_threshold: f64,
    pub max_alternates: usize,
    /// Characters of summary appended to the title before vectorising.
    pub summary_chars: usize,
}

/// Shape of the recency decay across the lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayCurve {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub recency: f64,
    pub reputation: f64,
    pub importance: f64,
    pub sentiment: f64,
    pub corroboration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentConfig {
    pub enabled: bool,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub decay: DecayCurve,
    /// Multiplier on recency when the publish date was not in the feed.
    pub estimated_date_discount: f64,
    /// Corroboration sub-score added per alternate source, capped at 1.
    pub corroboration_per_source: f64,
    pub weights: ScoreWeights,
    pub importance_keywords: BTreeMap<String, f64>,
    pub sentiment: SentimentConfig,
    /// Multiplier on the composite score by primary category. Missing keys are 1.0.
    #[serde(default)]
    pub category_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub top_n: usize,
    pub other_min: usize,
    pub other_max: usize,
    pub max_per_source: usize,
    /// Largest fraction of `main` one category may fill while others remain.
    pub max_category_share: f64,
    /// Categories with at most this many main articles render compact.
    pub compact_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub min_score: f64,
    pub max_confidence_score: f64,
    pub title_multiplier: f64,
    pub max_categories: usize,
    pub residual_category: String,
    /// Raw score added to the category hinted in the source list.
    #[serde(default = "one")]
    pub source_hint_boost: f64,
    pub precision: bool,
    #[serde(default)]
    pub global_exclusions: Vec<String>,
    /// Context line for categories without their own `why_matters`.
    #[serde(default = "default_why_matters")]
    pub default_why_matters: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceTables {
    pub tiers: BTreeMap<String, ReputationTier>,
    #[serde(default)]
    pub known_feeds: BTreeMap<String, Vec<String>>,
}

impl SourceTables {
    /// Tier for a publisher key, matching parent domains
    /// (`feeds.arstechnica.com` finds `arstechnica.com`). Unknown is `Low`.
    pub fn tier_for(&self, domain: &str) -> ReputationTier {
        let mut candidate = domain;
        loop {
            if let Some(tier) = self.tiers.get(candidate) {
                return *tier;
            }
            match candidate.split_once('.') {
                Some((_, rest)) if rest.contains('.') => candidate = rest,
                _ => return ReputationTier::Low,
            }
        }
    }

    pub fn known_feeds_for(&self, domain: &str) -> &[String] {
        self.known_feeds.get(domain).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedPattern {
    pub pattern: String,
    pub weight: f64,
}

/// One topical category and its lexical signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub key: String,
    pub title: String,
    #[serde(default = "one")]
    pub weight: f64,
    #[serde(default)]
    pub keywords_high: Vec<String>,
    #[serde(default)]
    pub keywords_medium: Vec<String>,
    #[serde(default)]
    pub keywords_low: Vec<String>,
    #[serde(default)]
    pub boosts: Vec<WeightedPattern>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub why_matters: String,
}

/// A named set of run settings. Command-line flags still win over it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub description: String,
    /// Fixed lookback; `None` keeps the run-state window.
    #[serde(default)]
    pub hours: Option<i64>,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub other_min: Option<usize>,
    #[serde(default)]
    pub other_max: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    /// Primary categories to keep. Empty keeps all.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub category_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Org,
    Product,
    Person,
    Place,
}

/// Curated entity → category mapping used by precision mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: EntityKind,
    pub category: String,
    #[serde(default = "half")]
    pub boost: f64,
}

fn one() -> f64 {
    1.0
}

fn half() -> f64 {
    0.5
}

fn default_why_matters() -> String {
    "High-signal development with downstream impact.".to_string()
}

fn three() -> usize {
    3
}

fn retry_backoff_ms() -> u64 {
    300
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        serde_yaml::from_str(DEFAULT_YAML).expect("embedded default.yaml is valid")
    }
}

impl Config {
    /// Load the embedded defaults, merging `path` over them when given.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut merged: Value = serde_yaml::from_str(DEFAULT_YAML)?;
        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let user: Value = serde_yaml::from_str(&text)?;
            merge_values(&mut merged, user);
            info!(path = %path.display(), "Merged user configuration");
        }
        let config: Config = serde_yaml::from_value(merged)?;
        config.validate()?;
        debug!(categories = config.categories.len(), tiers = config.sources.tiers.len(), "Configuration loaded");
        Ok(config)
    }

    /// Reject tunables that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let t = self.clustering.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return invalid("clustering.similarity_threshold must be in (0, 1]");
        }
        if self.pipeline.workers == 0 {
            return invalid("pipeline.workers must be at least 1");
        }
        if self.pipeline.min_lookback_hours <= 0
            || self.pipeline.min_lookback_hours > self.pipeline.max_lookback_days * 24
        {
            return invalid("pipeline.min_lookback_hours must be positive and below max_lookback_days");
        }
        if self.selection.top_n == 0 {
            return invalid("selection.top_n must be at least 1");
        }
        if self.selection.other_min > self.selection.other_max {
            return invalid("selection.other_min must not exceed selection.other_max");
        }
        if self.selection.max_per_source == 0 {
            return invalid("selection.max_per_source must be at least 1");
        }
        if !(self.selection.max_category_share > 0.0 && self.selection.max_category_share <= 1.0) {
            return invalid("selection.max_category_share must be in (0, 1]");
        }
        let w = &self.scoring.weights;
        if [w.recency, w.reputation, w.importance, w.sentiment, w.corroboration]
            .iter()
            .any(|v| *v < 0.0)
        {
            return invalid("scoring.weights must be non-negative");
        }
        if self.categories.is_empty() {
            return invalid("at least one category is required");
        }
        if self.categories.iter().any(|c| c.key == self.classifier.residual_category) {
            return invalid("classifier.residual_category must not be a configured category");
        }
        let bad_weight = |weights: &BTreeMap<String, f64>| weights.values().any(|w| !w.is_finite() || *w <= 0.0);
        if bad_weight(&self.scoring.category_weights) {
            return invalid("scoring.category_weights must be positive");
        }
        for (name, preset) in &self.presets {
            if preset.hours.is_some_and(|h| h <= 0) {
                return Err(ConfigError::Invalid(format!("preset {name}: hours must be positive")));
            }
            if bad_weight(&preset.category_weights) {
                return Err(ConfigError::Invalid(format!("preset {name}: category_weights must be positive")));
            }
        }
        Ok(())
    }

    /// Apply the named preset's selection, worker and weight settings.
    ///
    /// # Arguments
    ///
    /// * `name` - A key of the `presets` table.
    ///
    /// # Returns
    ///
    /// The applied preset, so the caller can use its lookback hours and
    /// category list, or [`ConfigError::Invalid`] naming the known presets.
    pub fn apply_preset(&mut self, name: &str) -> Result<Preset, ConfigError> {
        let Some(preset) = self.presets.get(name).cloned() else {
            let known = self.presets.keys().cloned().collect::<Vec<_>>().join(", ");
            return Err(ConfigError::Invalid(format!("unknown preset {name:?} (available: {known})")));
        };
        if let Some(v) = preset.top_n {
            self.selection.top_n = v;
        }
        if let Some(v) = preset.other_min {
            self.selection.other_min = v;
        }
        if let Some(v) = preset.other_max {
            self.selection.other_max = v;
        }
        if let Some(v) = preset.workers {
            self.pipeline.workers = v;
        }
        self.scoring
            .category_weights
            .extend(preset.category_weights.iter().map(|(k, w)| (k.clone(), *w)));
        info!(preset = name, description = %preset.description, "Applied preset");
        Ok(preset)
    }

    /// One line per preset: name, lookback, list size, description.
    pub fn describe_presets(&self) -> Vec<String> {
        self.presets
            .iter()
            .map(|(name, p)| {
                let hours = p.hours.map(|h| format!("{h}h")).unwrap_or_else(|| "auto".to_string());
                let top = p.top_n.unwrap_or(self.selection.top_n);
                format!("{name:15} | {hours:>5} | {top:>3} articles | {}", p.description)
            })
            .collect()
    }

    /// Context line for a primary category key.
    pub fn why_matters(&self, key: &str) -> &str {
        self.category(key)
            .map(|c| c.why_matters.as_str())
            .filter(|w| !w.is_empty())
            .unwrap_or(&self.classifier.default_why_matters)
    }

    pub fn category(&self, key: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.key == key)
    }

    /// Display title for a category key, including the residual category.
    pub fn category_title(&self, key: &str) -> String {
        match self.category(key) {
            Some(c) => c.title.clone(),
            None if key == self.classifier.residual_category => "General".to_string(),
            None => key.to_string(),
        }
    }
}

/// Merge `overlay` into `base`: mappings recurse, everything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_parses() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.selection.top_n, 30);
        assert_eq!(config.selection.other_min, 10);
        assert_eq!(config.selection.other_max, 20);
        assert_eq!(config.pipeline.default_lookback_hours, 48);
        assert!(config.category("ai_headlines").is_some());
        assert_eq!(config.sources.tiers.get("reuters.com"), Some(&ReputationTier::Top));
        assert_eq!(config.scoring.decay, DecayCurve::Linear);
    }

    #[test]
    fn test_user_config_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "selection:\n  top_n: 12\nclustering:\n  similarity_threshold: 0.6").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.selection.top_n, 12);
        assert_eq!(config.selection.max_per_source, 3);
        assert!((config.clustering.similarity_threshold - 0.6).abs() < 1e-9);
        assert!(!config.categories.is_empty());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clustering:\n  similarity_threshold: 1.5").unwrap();
        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_other_bounds_rejected() {
        let mut config = Config::default();
        config.selection.other_min = 30;
        config.selection.other_max = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_tier_lookup_matches_parent_domain() {
        let tables = Config::default().sources;
        assert_eq!(tables.tier_for("reuters.com"), ReputationTier::Top);
        assert_eq!(tables.tier_for("feeds.arstechnica.com"), ReputationTier::High);
        assert_eq!(tables.tier_for("unknown-blog.net"), ReputationTier::Low);
        assert_eq!(tables.tier_for("localhost"), ReputationTier::Low);
    }

    #[test]
    fn test_preset_applies_and_cli_style_overrides_win() {
        let mut config = Config::default();
        let preset = config.apply_preset("quick_update").unwrap();
        assert_eq!(preset.hours, Some(12));
        assert_eq!(config.selection.top_n, 15);
        assert_eq!(config.selection.max_per_source, 3);
        config.validate().unwrap();

        let mut config = Config::default();
        let preset = config.apply_preset("ai_focus").unwrap();
        assert!(preset.categories.contains(&"ai_headlines".to_string()));
        assert!(config.scoring.category_weights["ai_headlines"] > 1.0);
    }

    #[test]
    fn test_unknown_preset_lists_known_names() {
        let mut config = Config::default();
        let err = config.apply_preset("nope").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nope"));
        assert!(msg.contains("ai_focus"));
    }

    #[test]
    fn test_describe_presets() {
        let config = Config::default();
        let lines = config.describe_presets();
        assert_eq!(lines.len(), config.presets.len());
        assert!(lines.iter().any(|l| l.starts_with("quick_update") && l.contains("12h")));
        assert!(lines.iter().any(|l| l.starts_with("ai_focus") && l.contains("auto")));
    }

    #[test]
    fn test_invalid_preset_rejected() {
        let mut config = Config::default();
        config.presets.insert(
            "broken".into(),
            Preset {
                hours: Some(0),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scoring.category_weights.insert("ai_headlines".into(), -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_why_matters_falls_back() {
        let config = Config::default();
        assert!(config.why_matters("cybersecurity").starts_with("Security incidents"));
        assert_eq!(config.why_matters("general"), config.classifier.default_why_matters);
    }

    #[test]
    fn test_category_title_for_residual() {
        let config = Config::default();
        assert_eq!(config.category_title("general"), "General");
        assert_eq!(config.category_title("cybersecurity"), "Cybersecurity");
    }
}
