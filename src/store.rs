//! Article history for later digests.
//!
//! The store contract is insert-or-ignore by [`Article::id`]: re-running over
//! a story that was already stored leaves the stored record untouched.

use crate::error::StoreError;
use crate::models::Article;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Persistence collaborator for finalized articles.
pub trait ArticleStore {
    /// Insert articles whose id is not yet stored. Returns how many were new.
    async fn insert(&self, articles: &[Article], stored_at: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Stored articles published at or after `cutoff`, newest first.
    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Article>, StoreError>;

    /// Drop articles published more than `max_age_days` before `now`. Returns how many were dropped.
    async fn prune(&self, max_age_days: i64, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredArticle {
    stored_at: DateTime<Utc>,
    article: Article,
}

/// JSON-lines file store, one [`Article`] record per line.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<StoredArticle>, StoreError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (n, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str::<StoredArticle>(line) {
                Ok(r) => records.push(r),
                Err(e) => warn!(line = n + 1, error = %e, "Skipping corrupt store record"),
            }
        }
        Ok(records)
    }

    async fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

impl ArticleStore for JsonlStore {
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), articles = articles.len()))]
    async fn insert(&self, articles: &[Article], stored_at: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut known: HashSet<String> = self.load().await?.into_iter().map(|r| r.article.id).collect();
        let mut buf = String::new();
        let mut inserted = 0;
        for article in articles {
            if !known.insert(article.id.clone()) {
                continue;
            }
            let record = StoredArticle {
                stored_at,
                article: article.clone(),
            };
            buf.push_str(&serde_json::to_string(&record)?);
            buf.push('\n');
            inserted += 1;
        }
        if inserted > 0 {
            self.ensure_parent().await?;
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
            file.write_all(buf.as_bytes()).await?;
            file.flush().await?;
        }
        info!(inserted, ignored = articles.len() - inserted, "Articles stored");
        Ok(inserted)
    }

    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Article>, StoreError> {
        let mut out: Vec<Article> = self
            .load()
            .await?
            .into_iter()
            .map(|r| r.article)
            .filter(|a| a.published_at >= cutoff)
            .collect();
        out.sort_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| a.id.cmp(&b.id)));
        debug!(count = out.len(), %cutoff, "Loaded stored articles");
        Ok(out)
    }

    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), max_age_days))]
    async fn prune(&self, max_age_days: i64, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now - Duration::days(max_age_days);
        let records = self.load().await?;
        let before = records.len();
        let kept: Vec<StoredArticle> = records.into_iter().filter(|r| r.article.published_at >= cutoff).collect();
        let dropped = before - kept.len();
        if dropped == 0 {
            return Ok(0);
        }
        let mut buf = String::new();
        for record in &kept {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, buf).await?;
        fs::rename(&tmp, &self.path).await?;
        info!(dropped, kept = kept.len(), "Store pruned");
        Ok(dropped)
    }
}
