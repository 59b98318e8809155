//! Classifier: weighted keyword tables with per-category exclusions.
//!
//! Scoring is a pure function of the article text and the category
//! configuration. Precision mode adds entity-derived signal through an
//! [`EntityExtractor`]; it only ever adds score and never drops a category
//! that keywords alone would have assigned.

use crate::config::{CategoryConfig, ClassifierConfig, Config, EntityConfig, EntityKind};
use crate::models::{Article, CategoryTag};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

const HIGH_WEIGHT: f64 = 3.0;
const MEDIUM_WEIGHT: f64 = 1.5;
const LOW_WEIGHT: f64 = 0.5;
/// Entity boosts are configured on a [0,1] scale.
const ENTITY_SCALE: f64 = 5.0;

/// Lowercase, keep word characters plus `-` and `&`, single-space and pad.
///
/// Keywords go through the same function, so `" kw "` containment is a
/// whole-phrase match.
pub fn match_text(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '&' { c } else { ' ' })
        .collect();
    format!(" {} ", mapped.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Whole-phrase containment. A keyword ending in `-` matches as a prefix (`cve-`).
pub fn contains_phrase(haystack: &str, keyword: &str) -> bool {
    let needle = match_text(keyword);
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    if needle.ends_with('-') {
        haystack.contains(&format!(" {needle}"))
    } else {
        haystack.contains(&format!(" {needle} "))
    }
}

/// A named entity found in article text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub text: String,
    pub kind: EntityKind,
}

/// Named-entity recognition capability used by precision mode.
pub trait EntityExtractor {
    fn extract(&self, text: &str) -> Vec<Entity>;

    /// False for the no-op extractor; precision mode then degrades to keywords.
    fn is_available(&self) -> bool {
        true
    }
}

/// Default extractor: finds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExtractor;

impl EntityExtractor for NoopExtractor {
    fn extract(&self, _text: &str) -> Vec<Entity> {
        Vec::new()
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Dictionary extractor over the configured entity names and aliases.
#[derive(Debug, Clone)]
pub struct GazetteerExtractor {
    phrases: Vec<(String, String, EntityKind)>,
}

impl GazetteerExtractor {
    pub fn new(entities: &[EntityConfig]) -> Self {
        let phrases = entities
            .iter()
            .flat_map(|e| {
                std::iter::once(&e.name)
                    .chain(e.aliases.iter())
                    .map(move |p| (match_text(p).trim().to_string(), e.name.clone(), e.kind))
            })
            .filter(|(p, _, _)| !p.is_empty())
            .collect();
        Self { phrases }
    }
}

impl EntityExtractor for GazetteerExtractor {
    fn extract(&self, text: &str) -> Vec<Entity> {
        let haystack = match_text(text);
        let mut found: Vec<Entity> = Vec::new();
        for (phrase, name, kind) in &self.phrases {
            if haystack.contains(&format!(" {phrase} ")) && !found.iter().any(|e| &e.text == name) {
                found.push(Entity { text: name.clone(), kind: *kind });
            }
        }
        found
    }
}

/// Full classification result, including diagnostics for `--explain`.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Primary first; never empty.
    pub tags: Vec<CategoryTag>,
    /// Best-scoring category that was not assigned, if any scored above zero.
    pub runner_up: Option<String>,
    /// (category, pattern) pairs for exclusions that zeroed a category.
    pub excluded_by: Vec<(String, String)>,
    pub entities: Vec<Entity>,
}

/// Keyword/exclusion classifier with an optional entity extractor.
pub struct Classifier<'a, E> {
    root: &'a Config,
    categories: &'a [CategoryConfig],
    entities: &'a [EntityConfig],
    config: &'a ClassifierConfig,
    extractor: E,
    precision: bool,
}

impl<'a, E: EntityExtractor> Classifier<'a, E> {
    pub fn new(config: &'a Config, extractor: E) -> Self {
        let precision = config.classifier.precision && extractor.is_available();
        if config.classifier.precision && !precision {
            info!("Precision mode requested without an entity extractor; using keywords only");
        }
        Self {
            root: config,
            categories: &config.categories,
            entities: &config.entities,
            config: &config.classifier,
            extractor,
            precision,
        }
    }

    /// Raw score for one category, or the exclusion pattern that zeroed it.
    fn score_category(&self, category: &CategoryConfig, title: &str, body: &str, all: &str) -> Result<f64, String> {
        if let Some(hit) = category
            .exclude
            .iter()
            .chain(self.config.global_exclusions.iter())
            .find(|ex| contains_phrase(all, ex))
        {
            return Err(hit.clone());
        }

        let tiers = [
            (&category.keywords_high, HIGH_WEIGHT),
            (&category.keywords_medium, MEDIUM_WEIGHT),
            (&category.keywords_low, LOW_WEIGHT),
        ];
        let keywords = tiers
            .iter()
            .flat_map(|(kws, w)| kws.iter().map(move |k| (k.as_str(), *w)))
            .chain(category.boosts.iter().map(|b| (b.pattern.as_str(), b.weight)));

        let mut score = 0.0;
        for (keyword, weight) in keywords {
            if contains_phrase(title, keyword) {
                score += weight * self.config.title_multiplier;
            } else if contains_phrase(body, keyword) {
                score += weight;
            }
        }
        Ok(score * category.weight)
    }

    /// Classify one article. The result always carries at least one tag.
    pub fn classify(&self, article: &Article) -> Classification {
        let title = match_text(&article.title);
        let body = match_text(&article.summary_text);
        let all = match_text(&format!("{} {}", article.title, article.summary_text));

        let mut result = Classification::default();
        let mut scores: Vec<(String, f64)> = Vec::with_capacity(self.categories.len());
        for category in self.categories {
            match self.score_category(category, &title, &body, &all) {
                Ok(mut score) => {
                    if article.declared_category.as_deref() == Some(category.key.as_str()) && score > 0.0 {
                        score += self.config.source_hint_boost;
                    }
                    scores.push((category.key.clone(), score));
                }
                Err(pattern) => {
                    result.excluded_by.push((category.key.clone(), pattern));
                    scores.push((category.key.clone(), 0.0));
                }
            }
        }

        let keyword_qualified: Vec<String> = scores
            .iter()
            .filter(|(_, s)| *s >= self.config.min_score)
            .map(|(k, _)| k.clone())
            .collect();

        if self.precision {
            result.entities = self.extractor.extract(&format!("{} {}", article.title, article.summary_text));
            for (category, boost) in self.entity_boosts(&result.entities) {
                let excluded = result.excluded_by.iter().any(|(c, _)| *c == category);
                if let Some(slot) = scores.iter_mut().find(|(k, _)| *k == category) {
                    if !excluded {
                        slot.1 += boost;
                    }
                }
            }
        }

        let mut ranked: Vec<(String, f64)> = scores.clone();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let qualified: Vec<&(String, f64)> = ranked.iter().filter(|(_, s)| *s >= self.config.min_score).collect();

        let mut tags: Vec<CategoryTag> = qualified
            .iter()
            .take(self.config.max_categories.max(1))
            .map(|(key, score)| CategoryTag { key: key.clone(), confidence: self.confidence(*score) })
            .collect();
        if self.precision {
            // Entity boosts may reorder the cut; keyword matches stay assigned.
            for key in &keyword_qualified {
                if !tags.iter().any(|t| &t.key == key) {
                    let score = ranked.iter().find(|(k, _)| k == key).map(|(_, s)| *s).unwrap_or(0.0);
                    tags.push(CategoryTag { key: key.clone(), confidence: self.confidence(score) });
                }
            }
        }

        result.runner_up = ranked
            .iter()
            .find(|(k, s)| *s > 0.0 && !tags.iter().any(|t| &t.key == k))
            .map(|(k, _)| k.clone());

        if tags.is_empty() {
            tags.push(CategoryTag { key: self.config.residual_category.clone(), confidence: 0.0 });
        }
        result.tags = tags;
        result
    }

    fn confidence(&self, score: f64) -> f64 {
        if self.config.max_confidence_score <= 0.0 {
            return 1.0;
        }
        (score / self.config.max_confidence_score).clamp(0.0, 1.0)
    }

    /// Per-category additive boosts from recognised entities.
    fn entity_boosts(&self, found: &[Entity]) -> HashMap<String, f64> {
        let mut boosts: HashMap<String, f64> = HashMap::new();
        for entity in found {
            if let Some(entry) = self.entities.iter().find(|e| e.name == entity.text) {
                *boosts.entry(entry.category.clone()).or_default() += entry.boost * ENTITY_SCALE;
            }
        }
        boosts
    }

    /// Classify every article in place. Returns how many fell to the residual category.
    #[instrument(level = "info", skip_all, fields(articles = articles.len(), precision = self.precision))]
    pub fn classify_all(&self, articles: &mut [Article]) -> usize {
        let mut residual = 0;
        for article in articles.iter_mut() {
            let result = self.classify(article);
            if result.tags[0].key == self.config.residual_category {
                residual += 1;
            }
            if !result.excluded_by.is_empty() || result.runner_up.is_some() {
                debug!(
                    title = %article.title,
                    primary = %result.tags[0].key,
                    runner_up = ?result.runner_up,
                    excluded_by = ?result.excluded_by,
                    "Classified"
                );
            }
            article.why_matters = self.root.why_matters(&result.tags[0].key).to_string();
            article.categories = result.tags;
        }
        info!(residual, "Classification complete");
        residual
    }
}
