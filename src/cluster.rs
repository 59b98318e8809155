//! Deduplicator / Clusterer.
//!
//! Two passes:
//! 1. exact collapse on `canonical_url`;
//! 2. greedy TF-IDF clustering. Articles are visited newest first (ties by
//!    id) and each joins the first cluster whose seed has cosine similarity
//!    at or above the threshold, otherwise it seeds a new cluster.
//!
//! The result depends on visiting order. That order is fixed, so runs over
//! the same candidates are reproducible.
//!
//! Each cluster keeps one representative, chosen by a provisional
//! recency + reputation score; the other members become alternate links.

use crate::config::ClusterConfig;
use crate::models::{AlternateLink, Article};
use crate::utils::hours_between;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "if", "in", "into", "is", "it", "its", "just", "may", "more", "most",
    "new", "no", "not", "of", "on", "or", "our", "out", "over", "says", "she", "so", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "to", "up", "us",
    "was", "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "would",
    "you", "your",
];

/// Lowercase alphanumeric tokens without stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Unigrams plus adjacent bigrams.
pub fn terms(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let bigrams: Vec<String> = tokens.iter().tuple_windows().map(|(a, b)| format!("{a} {b}")).collect();
    tokens.into_iter().chain(bigrams).collect()
}

/// Sparse vector as (term index, weight), sorted by index.
pub type SparseVector = Vec<(usize, f64)>;

/// Smoothed TF-IDF model fitted on one candidate set.
#[derive(Debug, Default)]
pub struct TfIdfModel {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfIdfModel {
    /// Fit document frequencies. `idf = ln((1 + n) / (1 + df)) + 1`.
    pub fn fit(documents: &[Vec<String>]) -> Self {
        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: Vec<usize> = Vec::new();
        for doc in documents {
            let unique: HashSet<&String> = doc.iter().collect();
            for term in unique {
                let next = vocabulary.len();
                let idx = *vocabulary.entry(term.clone()).or_insert(next);
                if idx == doc_freq.len() {
                    doc_freq.push(0);
                }
                doc_freq[idx] += 1;
            }
        }
        let n = documents.len() as f64;
        let idf = doc_freq.iter().map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0).collect();
        Self { vocabulary, idf }
    }

    /// L2-normalised TF-IDF vector. Unknown terms are ignored.
    pub fn vectorize(&self, doc: &[String]) -> SparseVector {
        let mut tf: HashMap<usize, f64> = HashMap::new();
        for term in doc {
            if let Some(&idx) = self.vocabulary.get(term) {
                *tf.entry(idx).or_default() += 1.0;
            }
        }
        let mut vector: SparseVector = tf.into_iter().map(|(idx, count)| (idx, count * self.idf[idx])).collect();
        vector.sort_by_key(|(idx, _)| *idx);
        let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|(_, w)| *w /= norm);
        }
        vector
    }
}

/// Cosine similarity of two sparse vectors. 0 when either is empty.
pub fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (mut i, mut j, mut dot) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    let norm_a = a.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Representative-selection score used before final scoring.
pub fn provisional_score(article: &Article, now: DateTime<Utc>, window_hours: f64) -> f64 {
    let age = hours_between(article.published_at, now);
    let recency = if window_hours > 0.0 { (1.0 - age / window_hours).clamp(0.0, 1.0) } else { 0.0 };
    0.5 * recency + 0.5 * article.reputation_tier.weight()
}

/// Best-first order: provisional score, tier, earlier publish, id.
fn representative_order(a: &Article, sa: f64, b: &Article, sb: f64) -> Ordering {
    sb.partial_cmp(&sa)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.reputation_tier.cmp(&a.reputation_tier))
        .then_with(|| a.published_at.cmp(&b.published_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Collapse articles sharing a `canonical_url`, keeping the earliest
/// published copy and borrowing a missing image from the others.
pub fn collapse_exact(articles: Vec<Article>) -> Vec<Article> {
    let mut by_url: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Article> = Vec::with_capacity(articles.len());
    for article in articles {
        match by_url.get(&article.canonical_url) {
            Some(&idx) => {
                let existing = &mut kept[idx];
                if existing.image_url.is_none() {
                    existing.image_url = article.image_url.clone();
                }
                if existing.declared_category.is_none() {
                    existing.declared_category = article.declared_category.clone();
                }
                if article.published_at < existing.published_at && !article.date_estimated {
                    existing.published_at = article.published_at;
                    existing.date_estimated = false;
                }
            }
            None => {
                by_url.insert(article.canonical_url.clone(), kept.len());
                kept.push(article);
            }
        }
    }
    kept
}

/// Cluster representatives plus counters for [`RunStats`](crate::models::RunStats).
#[derive(Debug, Default)]
pub struct ClusterOutcome {
    pub representatives: Vec<Article>,
    pub unique_urls: usize,
    pub clusters: usize,
    pub multi_source_clusters: usize,
}

/// Text vectorised for an article: title twice, then a summary prefix.
fn document_text(article: &Article, summary_chars: usize) -> String {
    let summary: String = article.summary_text.chars().take(summary_chars).collect();
    format!("{0} {0} {1}", article.title, summary)
}

/// Collapse exact duplicates, cluster near-duplicates and keep one
/// representative per cluster with its alternates attached.
///
/// # Arguments
///
/// * `articles` - Normalized articles inside the lookback window
/// * `config` - Similarity threshold, alternate cap and summary prefix length
/// * `now` - Reference time for the provisional recency score
/// * `window_hours` - Lookback length the recency score is normalized to
///
/// # Returns
///
/// A [`ClusterOutcome`] with one representative per story and the
/// exact-URL and cluster counts.
#[instrument(level = "info", skip_all, fields(candidates = articles.len()))]
pub fn cluster(
    articles: Vec<Article>,
    config: &ClusterConfig,
    now: DateTime<Utc>,
    window_hours: f64,
) -> ClusterOutcome {
    let mut articles = collapse_exact(articles);
    let unique_urls = articles.len();
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| a.id.cmp(&b.id)));

    let documents: Vec<Vec<String>> =
        articles.iter().map(|a| terms(&document_text(a, config.summary_chars))).collect();
    let model = TfIdfModel::fit(&documents);
    let vectors: Vec<SparseVector> = documents.iter().map(|d| model.vectorize(d)).collect();

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for idx in 0..articles.len() {
        let target = groups
            .iter()
            .position(|g| cosine(&vectors[g[0]], &vectors[idx]) >= config.similarity_threshold);
        match target {
            Some(g) => groups[g].push(idx),
            None => groups.push(vec![idx]),
        }
    }

    let provisional: Vec<f64> = articles.iter().map(|a| provisional_score(a, now, window_hours)).collect();
    let mut slots: Vec<Option<Article>> = articles.into_iter().map(Some).collect();
    let mut outcome = ClusterOutcome { unique_urls, clusters: groups.len(), ..Default::default() };

    for mut group in groups {
        group.sort_by(|&x, &y| {
            let (ax, ay) = (slots[x].as_ref(), slots[y].as_ref());
            match (ax, ay) {
                (Some(a), Some(b)) => representative_order(a, provisional[x], b, provisional[y]),
                _ => Ordering::Equal,
            }
        });
        let mut members = group.into_iter().filter_map(|i| slots[i].take());
        let Some(mut representative) = members.next() else { continue };

        let mut seen_sources: HashSet<String> = HashSet::from([representative.source.clone()]);
        let mut distinct_sources = 1;
        let mut alternates = Vec::new();
        for member in members {
            if !seen_sources.insert(member.source.clone()) {
                continue;
            }
            distinct_sources += 1;
            if alternates.len() < config.max_alternates {
                alternates.push(AlternateLink {
                    source: member.source,
                    outlet: member.outlet,
                    url: member.canonical_url,
                });
            }
        }
        if distinct_sources > 1 {
            outcome.multi_source_clusters += 1;
            debug!(
                title = %representative.title,
                sources = distinct_sources,
                "Multi-source cluster"
            );
        }
        representative.cluster_id = format!("c{}", &representative.id[..representative.id.len().min(12)]);
        representative.alternate_links = alternates;
        outcome.representatives.push(representative);
    }

    info!(
        unique_urls = outcome.unique_urls,
        clusters = outcome.clusters,
        multi_source = outcome.multi_source_clusters,
        "Clustering complete"
    );
    outcome
}
