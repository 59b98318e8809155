//! Selector: bounded main and "other interesting" lists under diversity caps.
//!
//! Candidates are walked in rank order several times:
//!
//! 1. fill `main` with the per-source cap and the category share cap;
//! 2. backfill `main` with the category cap lifted when too few candidates
//!    from other categories remain;
//! 3. fill `other` with the per-source cap counted over `main + other`;
//! 4. if `other` is still under `other_min`, relax the source cap in rank
//!    order until the minimum is met.

use crate::config::SelectionConfig;
use crate::models::{Article, CategoryCount, SelectionResult};
use crate::score::rank_order;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Main,
    Other,
}

/// Largest number of `main` slots a single category may take while others remain.
pub fn category_cap(config: &SelectionConfig) -> usize {
    ((config.top_n as f64 * config.max_category_share).ceil() as usize).max(1)
}

fn primary(article: &Article) -> &str {
    article.primary_category().unwrap_or_default()
}

/// Pick `main` and `other` from scored representatives.
///
/// # Arguments
///
/// * `candidates` - Scored cluster representatives, in any order
/// * `config` - List sizes and diversity caps
/// * `category_order` - Order of `category_counts`; keys not in it are
///   appended alphabetically
///
/// # Returns
///
/// A [`SelectionResult`] with disjoint `main` and `other` lists. Its
/// `diversity_relaxed` flag is set when the source cap was lifted to reach
/// `other_min`.
#[instrument(level = "info", skip_all, fields(candidates = candidates.len(), top_n = config.top_n))]
pub fn select(mut candidates: Vec<Article>, config: &SelectionConfig, category_order: &[String]) -> SelectionResult {
    candidates.sort_by(rank_order);

    let cat_cap = category_cap(config);
    let mut slots = vec![Slot::Free; candidates.len()];
    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut per_category: HashMap<String, usize> = HashMap::new();
    let mut main_len = 0;

    for (i, article) in candidates.iter().enumerate() {
        if main_len == config.top_n {
            break;
        }
        let src = per_source.get(&article.source).copied().unwrap_or(0);
        let cat = per_category.get(primary(article)).copied().unwrap_or(0);
        if src >= config.max_per_source {
            debug!(source = %article.source, id = %article.id, "Source cap reached for main");
            continue;
        }
        if cat >= cat_cap {
            continue;
        }
        slots[i] = Slot::Main;
        main_len += 1;
        *per_source.entry(article.source.clone()).or_default() += 1;
        *per_category.entry(primary(article).to_string()).or_default() += 1;
    }

    if main_len < config.top_n {
        let before = main_len;
        for (i, article) in candidates.iter().enumerate() {
            if main_len == config.top_n {
                break;
            }
            if slots[i] != Slot::Free || per_source.get(&article.source).copied().unwrap_or(0) >= config.max_per_source {
                continue;
            }
            slots[i] = Slot::Main;
            main_len += 1;
            *per_source.entry(article.source.clone()).or_default() += 1;
        }
        if main_len > before {
            debug!(added = main_len - before, "Category share relaxed to fill main");
        }
    }

    let mut other_len = 0;
    for (i, article) in candidates.iter().enumerate() {
        if other_len == config.other_max {
            break;
        }
        if slots[i] != Slot::Free || per_source.get(&article.source).copied().unwrap_or(0) >= config.max_per_source {
            continue;
        }
        slots[i] = Slot::Other;
        other_len += 1;
        *per_source.entry(article.source.clone()).or_default() += 1;
    }

    let mut diversity_relaxed = false;
    if other_len < config.other_min {
        for slot in slots.iter_mut() {
            if other_len == config.other_min {
                break;
            }
            if *slot == Slot::Free {
                *slot = Slot::Other;
                other_len += 1;
                diversity_relaxed = true;
            }
        }
        if diversity_relaxed {
            warn!(other = other_len, other_min = config.other_min, "Per-source cap relaxed to reach minimum");
        }
    }

    let mut main = Vec::with_capacity(main_len);
    let mut other = Vec::with_capacity(other_len);
    for (article, slot) in candidates.into_iter().zip(slots) {
        match slot {
            Slot::Main => main.push(article),
            Slot::Other => other.push(article),
            Slot::Free => {}
        }
    }

    let category_counts = count_categories(&main, &other, category_order, config.compact_threshold);
    info!(
        main = main.len(),
        other = other.len(),
        categories = category_counts.len(),
        diversity_relaxed,
        "Selection complete"
    );
    SelectionResult {
        main,
        other,
        category_counts,
        diversity_relaxed,
    }
}

/// Per-category counts by primary category, with the compact-rendering flag.
pub fn count_categories(
    main: &[Article],
    other: &[Article],
    category_order: &[String],
    compact_threshold: usize,
) -> Vec<CategoryCount> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for a in main {
        counts.entry(primary(a)).or_default().0 += 1;
    }
    for a in other {
        counts.entry(primary(a)).or_default().1 += 1;
    }

    let mut keys: Vec<&str> = category_order
        .iter()
        .map(String::as_str)
        .filter(|k| counts.contains_key(k))
        .collect();
    let mut extra: Vec<&str> = counts
        .keys()
        .copied()
        .filter(|k| !category_order.iter().any(|o| o == k))
        .collect();
    extra.sort_unstable();
    keys.extend(extra);

    keys.into_iter()
        .map(|key| {
            let (main, other) = counts[key];
            CategoryCount {
                category: key.to_string(),
                main,
                other,
                compact: main > 0 && main <= compact_threshold,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryTag, fixtures::article};
    use chrono::{Duration, TimeZone, Utc};

    fn candidate(id: usize, source: &str, category: &str, score: f64) -> Article {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut a = article(&format!("id{id:03}"), source, &format!("Story {id}"), now - Duration::minutes(id as i64));
        a.categories = vec![CategoryTag {
            key: category.to_string(),
            confidence: 0.5,
        }];
        a.score = score;
        a
    }

    fn config(top_n: usize, other_min: usize, other_max: usize, max_per_source: usize) -> SelectionConfig {
        SelectionConfig {
            top_n,
            other_min,
            other_max,
            max_per_source,
            max_category_share: 1.0,
            compact_threshold: 2,
        }
    }

    fn from(list: &[Article], source: &str) -> usize {
        list.iter().filter(|a| a.source == source).count()
    }

    #[test]
    fn test_prolific_source_is_capped_and_displaced_into_other() {
        // prolific.example holds 15 of the top 20 scores.
        let mut pool = Vec::new();
        for i in 0..15 {
            pool.push(candidate(i, "prolific.example", "ai_headlines", 100.0 - i as f64));
        }
        for i in 0..10 {
            pool.push(candidate(100 + i, &format!("s{i}.example"), "ai_headlines", 90.0 - i as f64 * 2.0));
        }

        let result = select(pool, &config(30, 10, 20, 3), &[]);
        assert_eq!(from(&result.main, "prolific.example"), 3);
        assert_eq!(result.main.len(), 13);
        assert_eq!(result.other.len(), 10);
        assert!(result.diversity_relaxed);
        // Displaced high scorers come back first, in rank order.
        assert_eq!(result.other[0].id, "id003");
        assert!(result.other.iter().all(|a| a.source == "prolific.example"));
        assert!(result.main.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_combined_cap_without_relaxation() {
        let mut pool = Vec::new();
        for i in 0..6 {
            pool.push(candidate(i, "a.example", "x", 50.0 - i as f64));
        }
        for i in 0..20 {
            pool.push(candidate(10 + i, &format!("s{i}.example"), "x", 30.0 - i as f64));
        }
        let result = select(pool, &config(5, 2, 10, 2), &[]);
        assert_eq!(from(&result.main, "a.example"), 2);
        assert_eq!(from(&result.other, "a.example"), 0);
        assert_eq!(result.other.len(), 10);
        assert!(!result.diversity_relaxed);
    }

    #[test]
    fn test_no_duplicate_articles_across_lists() {
        let pool: Vec<Article> = (0..40).map(|i| candidate(i, &format!("s{}.example", i % 7), "x", i as f64)).collect();
        let result = select(pool, &config(10, 5, 15, 2), &[]);
        let mut ids: Vec<&str> = result.main.iter().chain(&result.other).map(|a| a.id.as_str()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(result.other.len() >= 5 && result.other.len() <= 15);
    }

    #[test]
    fn test_category_share_balances_main() {
        let mut pool = Vec::new();
        for i in 0..20 {
            pool.push(candidate(i, &format!("ai{i}.example"), "ai_headlines", 100.0 - i as f64));
        }
        for i in 0..20 {
            pool.push(candidate(50 + i, &format!("fin{i}.example"), "finance_markets", 50.0 - i as f64));
        }
        let mut cfg = config(10, 0, 10, 3);
        cfg.max_category_share = 0.5;
        let result = select(pool, &cfg, &["ai_headlines".to_string(), "finance_markets".to_string()]);
        let ai = result.main.iter().filter(|a| a.has_category("ai_headlines")).count();
        assert_eq!(ai, 5);
        assert_eq!(result.main.len(), 10);
        assert_eq!(result.category_counts[0].category, "ai_headlines");
        assert_eq!(result.category_counts[0].main, 5);
    }

    #[test]
    fn test_category_share_yields_when_nothing_else_exists() {
        let pool: Vec<Article> =
            (0..12).map(|i| candidate(i, &format!("s{i}.example"), "ai_headlines", 100.0 - i as f64)).collect();
        let mut cfg = config(10, 0, 5, 3);
        cfg.max_category_share = 0.5;
        let result = select(pool, &cfg, &[]);
        assert_eq!(result.main.len(), 10);
        assert_eq!(result.other.len(), 2);
    }

    #[test]
    fn test_compact_flag_for_sparse_categories() {
        let mut pool = vec![
            candidate(1, "a.example", "crypto_blockchain", 90.0),
            candidate(2, "b.example", "zeta", 80.0),
        ];
        for i in 0..5 {
            pool.push(candidate(10 + i, &format!("s{i}.example"), "ai_headlines", 70.0 - i as f64));
        }
        let order = vec!["ai_headlines".to_string(), "crypto_blockchain".to_string()];
        let result = select(pool, &config(10, 0, 5, 3), &order);
        let keys: Vec<&str> = result.category_counts.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(keys, vec!["ai_headlines", "crypto_blockchain", "zeta"]);
        assert!(!result.category_counts[0].compact);
        assert!(result.category_counts[1].compact);
        assert!(result.category_counts[2].compact);
    }

    #[test]
    fn test_empty_pool() {
        let result = select(Vec::new(), &config(30, 10, 20, 3), &[]);
        assert!(result.main.is_empty());
        assert!(result.other.is_empty());
        assert!(!result.diversity_relaxed);
    }
}
