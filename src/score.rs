//! Scorer: composite importance score per cluster representative.
//!
//! `score = (Σ weight_i × sub_i) × category_weight` where every sub-score is
//! in [0,1], every weight is non-negative and the category multiplier is
//! positive, so the score is monotonic in each factor.

use crate::classify::{contains_phrase, match_text};
use crate::config::{DecayCurve, ScoringConfig, SentimentConfig};
use crate::models::{Article, Priority, ScoreBreakdown};
use crate::utils::hours_between;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Steepness of the exponential curve: about 5% left at the window edge.
const EXP_DECAY_RATE: f64 = 3.0;

/// Bounds on the per-category score multiplier.
const MIN_CATEGORY_WEIGHT: f64 = 0.5;
const MAX_CATEGORY_WEIGHT: f64 = 2.0;

/// Recency in [0,1]: 1 at publish time, decaying over the lookback window.
pub fn recency(age_hours: f64, window_hours: f64, decay: DecayCurve) -> f64 {
    if window_hours <= 0.0 {
        return 0.0;
    }
    let ratio = (age_hours.max(0.0) / window_hours).min(1.0);
    match decay {
        DecayCurve::Linear => 1.0 - ratio,
        DecayCurve::Exponential => (-EXP_DECAY_RATE * ratio).exp(),
    }
}

/// Bounded sum of matched high-salience keyword weights.
pub fn importance(text: &str, keywords: &BTreeMap<String, f64>) -> f64 {
    let haystack = match_text(text);
    keywords
        .iter()
        .filter(|(kw, _)| contains_phrase(&haystack, kw))
        .map(|(_, w)| w.max(0.0))
        .sum::<f64>()
        .min(1.0)
}

/// Polarity strength in [0,1]. Mixed or neutral text scores low.
pub fn sentiment(text: &str, config: &SentimentConfig) -> f64 {
    if !config.enabled {
        return 0.0;
    }
    let haystack = match_text(text);
    let count = |words: &[String]| words.iter().filter(|w| contains_phrase(&haystack, w)).count() as f64;
    let (pos, neg) = (count(&config.positive), count(&config.negative));
    let total = pos + neg;
    if total == 0.0 {
        return 0.0;
    }
    let polarity = ((pos - neg) / total).abs();
    let intensity = (total / 3.0).min(1.0);
    polarity * intensity
}

/// Priority badge from the importance and recency sub-scores.
pub fn priority(importance: f64, recency: f64) -> Priority {
    if importance > 0.5 && recency > 0.8 {
        Priority::Breaking
    } else if importance > 0.3 || recency > 0.7 {
        Priority::Important
    } else {
        Priority::Normal
    }
}

/// Ranking order: score, then tier, then alternate count, then earlier
/// publish time, then id.
pub fn rank_order(a: &Article, b: &Article) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.reputation_tier.cmp(&a.reputation_tier))
        .then_with(|| b.alternate_links.len().cmp(&a.alternate_links.len()))
        .then_with(|| a.published_at.cmp(&b.published_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct Scorer<'a> {
    config: &'a ScoringConfig,
    now: DateTime<Utc>,
    window_hours: f64,
}

impl<'a> Scorer<'a> {
    pub fn new(config: &'a ScoringConfig, now: DateTime<Utc>, window_hours: f64) -> Self {
        Self { config, now, window_hours }
    }

    /// Sub-scores for one article.
    pub fn breakdown(&self, article: &Article) -> ScoreBreakdown {
        let text = format!("{} {}", article.title, article.summary_text);
        let mut rec = recency(hours_between(article.published_at, self.now), self.window_hours, self.config.decay);
        if article.date_estimated {
            rec *= self.config.estimated_date_discount;
        }
        ScoreBreakdown {
            recency: rec,
            reputation: article.reputation_tier.weight(),
            importance: importance(&text, &self.config.importance_keywords),
            sentiment: sentiment(&text, &self.config.sentiment),
            corroboration: (article.alternate_links.len() as f64 * self.config.corroboration_per_source).min(1.0),
        }
    }

    /// Configured multiplier for a primary category, clamped to
    /// `[MIN_CATEGORY_WEIGHT, MAX_CATEGORY_WEIGHT]`.
    pub fn category_weight(&self, category: Option<&str>) -> f64 {
        category
            .and_then(|key| self.config.category_weights.get(key))
            .map(|w| w.clamp(MIN_CATEGORY_WEIGHT, MAX_CATEGORY_WEIGHT))
            .unwrap_or(1.0)
    }

    pub fn composite(&self, b: &ScoreBreakdown, category: Option<&str>) -> f64 {
        let w = &self.config.weights;
        let base = w.recency * b.recency
            + w.reputation * b.reputation
            + w.importance * b.importance
            + w.sentiment * b.sentiment
            + w.corroboration * b.corroboration;
        base * self.category_weight(category)
    }

    /// Set `breakdown`, `score` and `priority` on one article.
    pub fn score(&self, article: &mut Article) -> f64 {
        let breakdown = self.breakdown(article);
        article.score = self.composite(&breakdown, article.primary_category());
        article.priority = priority(breakdown.importance, breakdown.recency);
        article.breakdown = breakdown;
        article.score
    }

    /// Score every article and sort best first.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub fn score_all(&self, articles: &mut Vec<Article>) {
        for article in articles.iter_mut() {
            self.score(article);
        }
        articles.sort_by(rank_order);
        let breaking = articles.iter().filter(|a| a.priority == Priority::Breaking).count();
        info!(
            top = articles.first().map(|a| a.score).unwrap_or_default(),
            breaking,
            "Scoring complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{AlternateLink, CategoryTag, ReputationTier, fixtures::article};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_recency_normalises_to_window() {
        assert_eq!(recency(0.0, 48.0, DecayCurve::Linear), 1.0);
        assert!((recency(24.0, 48.0, DecayCurve::Linear) - 0.5).abs() < 1e-9);
        assert!((recency(84.0, 168.0, DecayCurve::Linear) - 0.5).abs() < 1e-9);
        assert_eq!(recency(100.0, 48.0, DecayCurve::Linear), 0.0);
        let e = recency(24.0, 48.0, DecayCurve::Exponential);
        assert!(e > 0.0 && e < 1.0);
        assert!(recency(1.0, 48.0, DecayCurve::Exponential) > recency(2.0, 48.0, DecayCurve::Exponential));
    }

    #[test]
    fn test_importance_is_bounded() {
        let config = Config::default();
        let kw = &config.scoring.importance_keywords;
        assert_eq!(importance("Quiet afternoon", kw), 0.0);
        let one = importance("Breaking: outage hits cloud", kw);
        assert!((one - 0.40).abs() < 1e-9);
        let many = importance("Breaking exclusive: major billion record breach outage ransomware lawsuit", kw);
        assert_eq!(many, 1.0);
    }

    #[test]
    fn test_sentiment_prefers_polarity() {
        let config = Config::default().scoring.sentiment;
        assert_eq!(sentiment("Council meets on Tuesday", &config), 0.0);
        let strong = sentiment("Markets crash as fraud scandal deepens", &config);
        let mixed = sentiment("Shares surge then crash", &config);
        assert!(strong > mixed);
        assert!(strong <= 1.0);
    }

    #[test]
    fn test_priority_badges() {
        assert_eq!(priority(0.6, 0.9), Priority::Breaking);
        assert_eq!(priority(0.4, 0.2), Priority::Important);
        assert_eq!(priority(0.0, 0.75), Priority::Important);
        assert_eq!(priority(0.1, 0.2), Priority::Normal);
    }

    #[test]
    fn test_score_is_deterministic_and_monotonic_in_tier() {
        let config = Config::default();
        let scorer = Scorer::new(&config.scoring, now(), 48.0);
        let mut low = article("a", "a.example", "Chip startup raises funds", now() - Duration::hours(3));
        let mut top = low.clone();
        low.reputation_tier = ReputationTier::Low;
        top.reputation_tier = ReputationTier::Top;
        let s1 = scorer.score(&mut low);
        assert_eq!(s1, scorer.score(&mut low.clone()));
        assert!(scorer.score(&mut top) > s1);
    }

    #[test]
    fn test_estimated_dates_discount_recency() {
        let config = Config::default();
        let scorer = Scorer::new(&config.scoring, now(), 48.0);
        let mut known = article("a", "a.example", "Title", now());
        let mut estimated = known.clone();
        estimated.date_estimated = true;
        scorer.score(&mut known);
        scorer.score(&mut estimated);
        assert!(estimated.breakdown.recency < known.breakdown.recency);
    }

    #[test]
    fn test_ties_break_on_tier_then_alternates_then_age() {
        let base = article("a", "a.example", "T", now());
        let mut higher_tier = base.clone();
        higher_tier.id = "b".into();
        higher_tier.reputation_tier = ReputationTier::High;
        assert_eq!(rank_order(&higher_tier, &base), Ordering::Less);

        let mut corroborated = base.clone();
        corroborated.id = "c".into();
        corroborated.alternate_links.push(AlternateLink {
            source: "x.example".into(),
            outlet: "X".into(),
            url: "https://x.example/1".into(),
        });
        assert_eq!(rank_order(&corroborated, &base), Ordering::Less);

        let mut older = base.clone();
        older.id = "d".into();
        older.published_at = now() - Duration::minutes(5);
        assert_eq!(rank_order(&older, &base), Ordering::Less);
    }

    #[test]
    fn test_corroboration_adds_bounded_bonus() {
        let config = Config::default();
        let scorer = Scorer::new(&config.scoring, now(), 48.0);
        let mut single = article("a", "a.example", "Story", now());
        let mut multi = single.clone();
        for i in 0..5 {
            multi.alternate_links.push(AlternateLink {
                source: format!("s{i}.example"),
                outlet: format!("S{i}"),
                url: format!("https://s{i}.example/x"),
            });
        }
        scorer.score(&mut single);
        scorer.score(&mut multi);
        assert_eq!(multi.breakdown.corroboration, 1.0);
        assert!(multi.score > single.score);
    }

    #[test]
    fn test_category_weight_scales_score_within_bounds() {
        let mut config = Config::default();
        config.scoring.category_weights.insert("ai_headlines".into(), 1.5);
        config.scoring.category_weights.insert("world_news".into(), 10.0);
        let scorer = Scorer::new(&config.scoring, now(), 48.0);

        let mut plain = article("a", "a.example", "Story", now());
        plain.categories = vec![CategoryTag {
            key: "cybersecurity".into(),
            confidence: 0.5,
        }];
        let mut ai = plain.clone();
        ai.categories[0].key = "ai_headlines".into();

        let base = scorer.score(&mut plain);
        assert!((scorer.score(&mut ai) - base * 1.5).abs() < 1e-9);
        assert_eq!(scorer.category_weight(Some("world_news")), 2.0);
        assert_eq!(scorer.category_weight(None), 1.0);
    }
}
