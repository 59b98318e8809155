//! Run-state tracker: the last successful run's timestamp and the lookback
//! window derived from it.

use crate::config::PipelineConfig;
use crate::error::StateError;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Why the window has the length it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOrigin {
    Override,
    FirstRun,
    SinceLastRun,
}

/// `[start, end]` bounds for window filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LookbackWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub hours: i64,
    pub origin: WindowOrigin,
}

impl LookbackWindow {
    /// Whole days covered, rounded up. Used for date-restricted search feeds.
    pub fn days(&self) -> i64 {
        (self.hours + 23) / 24
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Compute the lookback window.
///
/// An explicit override wins. Without prior state the configured default is
/// used. Otherwise the hours since the last run, clamped to
/// `[min_lookback_hours, max_lookback_days * 24]`.
///
/// # Arguments
///
/// * `now` - End of the window
/// * `last_run_at` - Last successful run, if the state file had one
/// * `override_hours` - `--hours` or the preset's lookback
/// * `config` - Default, minimum and maximum lookback
///
/// # Returns
///
/// A [`LookbackWindow`] recording which rule produced it.
pub fn compute_window(
    now: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    override_hours: Option<i64>,
    config: &PipelineConfig,
) -> LookbackWindow {
    let (hours, origin) = match (override_hours, last_run_at) {
        (Some(h), _) => (h.max(1), WindowOrigin::Override),
        (None, None) => (config.default_lookback_hours, WindowOrigin::FirstRun),
        (None, Some(last)) => {
            let secs = (now - last).num_seconds().max(0);
            let since = (secs + 3599) / 3600;
            let clamped = since.clamp(config.min_lookback_hours, config.max_lookback_days * 24);
            if clamped != since {
                debug!(since, clamped, "Lookback clamped");
            }
            (clamped, WindowOrigin::SinceLastRun)
        }
    };
    LookbackWindow {
        start: now - Duration::hours(hours),
        end: now,
        hours,
        origin,
    }
}

/// Parse a persisted ISO-8601 timestamp into UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StateError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StateError::Timestamp(text.trim().to_string()))
}

/// File-backed run state: a single RFC 3339 line.
#[derive(Debug, Clone)]
pub struct RunStateTracker {
    path: PathBuf,
}

impl RunStateTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last successful run, `None` when missing or unreadable.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn read(&self) -> Option<DateTime<Utc>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No run state yet");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Run state unreadable; treating as first run");
                return None;
            }
        };
        match parse_timestamp(&text) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(error = %e, "Run state corrupt; treating as first run");
                None
            }
        }
    }

    /// Persist `ts` by writing a sibling temp file and renaming it over the target.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn write(&self, ts: DateTime<Utc>) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, format!("{}\n", ts.to_rfc3339())).await?;
        fs::rename(&tmp, &self.path).await?;
        info!(last_run_at = %ts.to_rfc3339(), "Run state updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_recent_run_clamps_up_to_a_day() {
        let config = Config::default().pipeline;
        let w = compute_window(now(), Some(now() - Duration::hours(2)), None, &config);
        assert_eq!(w.hours, 24);
        assert_eq!(w.origin, WindowOrigin::SinceLastRun);
        assert_eq!(w.start, now() - Duration::hours(24));
    }

    #[test]
    fn test_old_run_clamps_down_to_thirty_days() {
        let config = Config::default().pipeline;
        let w = compute_window(now(), Some(now() - Duration::days(90)), None, &config);
        assert_eq!(w.hours, 30 * 24);
        assert_eq!(w.days(), 30);
    }

    #[test]
    fn test_mid_range_passes_through() {
        let config = Config::default().pipeline;
        let w = compute_window(now(), Some(now() - Duration::days(5)), None, &config);
        assert_eq!(w.hours, 120);
        assert_eq!(w.days(), 5);
    }

    #[test]
    fn test_override_and_first_run() {
        let config = Config::default().pipeline;
        let w = compute_window(now(), Some(now() - Duration::days(5)), Some(6), &config);
        assert_eq!((w.hours, w.origin), (6, WindowOrigin::Override));
        let w = compute_window(now(), None, None, &config);
        assert_eq!((w.hours, w.origin), (48, WindowOrigin::FirstRun));
        assert!(w.contains(now()));
        assert!(!w.contains(now() - Duration::hours(49)));
        assert!(!w.contains(now() + Duration::minutes(1)));
    }

    #[test]
    fn test_parse_timestamp_normalises_to_utc() {
        let ts = parse_timestamp("2025-03-10T14:00:00+02:00\n").unwrap();
        assert_eq!(ts, now());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RunStateTracker::new(dir.path().join("state/last_run"));
        assert_eq!(tracker.read().await, None);
        tracker.write(now()).await.unwrap();
        assert_eq!(tracker.read().await, Some(now()));
        assert!(!dir.path().join("state/last_run.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_state_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_run");
        std::fs::write(&path, "not a time").unwrap();
        assert_eq!(RunStateTracker::new(&path).read().await, None);
    }
}
