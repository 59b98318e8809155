//! Report builder: turns a [`SelectionResult`] into render-ready sections.
//!
//! The report carries no markup. Sections follow category configuration
//! order; categories flagged compact by the selector are gathered into one
//! grouped block.

use crate::config::Config;
use crate::models::{Article, CategoryCount, RunStats, SelectionResult};
use crate::score::rank_order;
use crate::state::LookbackWindow;
use crate::utils::{edition_for, slugify_title, truncate_for_log};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub key: String,
    pub title: String,
    /// In-page anchor derived from the title.
    pub anchor: String,
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DiversitySummary {
    pub unique_sources: usize,
    pub max_from_one_source: usize,
    pub categories_represented: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub local_date: String,
    pub edition: String,
    pub window: LookbackWindow,
    pub sections: Vec<Section>,
    pub compact_group: Vec<Section>,
    pub other: Vec<Article>,
    pub category_counts: Vec<CategoryCount>,
    pub diversity_relaxed: bool,
    pub diversity: DiversitySummary,
    pub stats: RunStats,
}

impl Report {
    /// Every article in the report, main sections first.
    pub fn articles(&self) -> impl Iterator<Item = &Article> {
        self.sections
            .iter()
            .chain(&self.compact_group)
            .flat_map(|s| s.articles.iter())
            .chain(&self.other)
    }

    pub fn is_empty(&self) -> bool {
        self.articles().next().is_none()
    }
}

/// Unique sources and the largest per-source count over `main`.
pub fn diversity(main: &[Article]) -> DiversitySummary {
    let mut per_source: HashMap<&str, usize> = HashMap::new();
    for a in main {
        *per_source.entry(a.source.as_str()).or_default() += 1;
    }
    let categories: BTreeSet<&str> = main.iter().filter_map(|a| a.primary_category()).collect();
    DiversitySummary {
        unique_sources: per_source.len(),
        max_from_one_source: per_source.values().copied().max().unwrap_or(0),
        categories_represented: categories.len(),
    }
}

/// Assemble the report. `local_now` decides the date folder and edition name.
pub fn build_report(
    selection: SelectionResult,
    config: &Config,
    window: LookbackWindow,
    stats: RunStats,
    local_now: NaiveDateTime,
) -> Report {
    let SelectionResult {
        main,
        other,
        category_counts,
        diversity_relaxed,
    } = selection;
    let diversity = diversity(&main);

    let mut grouped: HashMap<String, Vec<Article>> = HashMap::new();
    for article in main {
        let key = article.primary_category().unwrap_or(&config.classifier.residual_category).to_string();
        grouped.entry(key).or_default().push(article);
    }

    let mut sections = Vec::new();
    let mut compact_group = Vec::new();
    for count in &category_counts {
        let Some(articles) = grouped.remove(&count.category) else {
            continue;
        };
        let title = config.category_title(&count.category);
        let section = Section {
            key: count.category.clone(),
            anchor: slugify_title(&title),
            title,
            articles,
        };
        if count.compact {
            compact_group.push(section);
        } else {
            sections.push(section);
        }
    }

    let report = Report {
        generated_at: window.end,
        local_date: local_now.date().to_string(),
        edition: edition_for(local_now.time()).to_string(),
        window,
        sections,
        compact_group,
        other,
        category_counts,
        diversity_relaxed,
        diversity,
        stats,
    };
    info!(
        edition = %report.edition,
        sections = report.sections.len(),
        compact = report.compact_group.len(),
        other = report.other.len(),
        unique_sources = report.diversity.unique_sources,
        "Report built"
    );
    report
}

/// Log the score breakdown of the first `limit` main articles.
pub fn log_explanation(report: &Report, limit: usize) {
    let main = report.sections.iter().chain(&report.compact_group).flat_map(|s| s.articles.iter());
    let mut ranked: Vec<&Article> = main.collect();
    ranked.sort_by(|a, b| rank_order(a, b));
    for (rank, a) in ranked.into_iter().take(limit).enumerate() {
        let b = &a.breakdown;
        info!(
            rank = rank + 1,
            score = %format!("{:.3}", a.score),
            recency = %format!("{:.2}", b.recency),
            reputation = %format!("{:.2}", b.reputation),
            importance = %format!("{:.2}", b.importance),
            sentiment = %format!("{:.2}", b.sentiment),
            corroboration = %format!("{:.2}", b.corroboration),
            priority = ?a.priority,
            source = %a.source,
            tier = %a.reputation_tier,
            title = %truncate_for_log(&a.title, 80),
            "Score breakdown"
        );
    }
    let d = &report.diversity;
    info!(
        unique_sources = d.unique_sources,
        max_from_one_source = d.max_from_one_source,
        categories = d.categories_represented,
        relaxed = report.diversity_relaxed,
        "Diversity summary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryTag, fixtures::article};
    use crate::select::select;
    use crate::state::WindowOrigin;
    use chrono::{NaiveDate, TimeZone};

    fn tagged(id: &str, source: &str, category: &str, score: f64) -> Article {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut a = article(id, source, id, now);
        a.categories = vec![CategoryTag {
            key: category.into(),
            confidence: 0.4,
        }];
        a.score = score;
        a
    }

    fn window() -> LookbackWindow {
        let end = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        LookbackWindow {
            start: end - chrono::Duration::hours(48),
            end,
            hours: 48,
            origin: WindowOrigin::FirstRun,
        }
    }

    #[test]
    fn test_sections_follow_config_order_and_compact_grouping() {
        let mut config = Config::default();
        config.selection.top_n = 10;
        config.selection.other_min = 0;
        config.selection.max_category_share = 1.0;
        let order: Vec<String> = config.categories.iter().map(|c| c.key.clone()).collect();

        let pool = vec![
            tagged("f1", "a.example", "finance_markets", 9.0),
            tagged("f2", "b.example", "finance_markets", 8.0),
            tagged("f3", "c.example", "finance_markets", 7.0),
            tagged("a1", "d.example", "ai_headlines", 6.0),
            tagged("a2", "e.example", "ai_headlines", 5.0),
            tagged("a3", "f.example", "ai_headlines", 4.5),
            tagged("g1", "g.example", "general", 4.0),
        ];
        let selection = select(pool, &config.selection, &order);
        let local = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap().and_hms_opt(7, 30, 0).unwrap();
        let report = build_report(selection, &config, window(), RunStats::default(), local);

        let keys: Vec<&str> = report.sections.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["ai_headlines", "finance_markets"]);
        assert_eq!(report.sections[0].anchor, "aiml-headlines");
        assert_eq!(report.compact_group.len(), 1);
        assert_eq!(report.compact_group[0].title, "General");
        assert_eq!(report.edition, "morning");
        assert_eq!(report.local_date, "2025-03-10");
        assert_eq!(report.diversity.unique_sources, 7);
        assert_eq!(report.diversity.categories_represented, 3);
        assert_eq!(report.articles().count(), 7);
    }

    #[test]
    fn test_empty_selection_gives_empty_report() {
        let config = Config::default();
        let local = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap().and_hms_opt(18, 0, 0).unwrap();
        let report = build_report(SelectionResult::default(), &config, window(), RunStats::default(), local);
        assert!(report.is_empty());
        assert_eq!(report.edition, "evening");
        assert_eq!(report.diversity, DiversitySummary::default());
    }
}
