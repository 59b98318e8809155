//! Report and digest writers.
//!
//! The report goes to `{json_output_dir}/{local_date}/{edition}.json`; a
//! digest lands in the same date folder as `digest-{days}d.md`.

use crate::report::Report;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

async fn date_dir(json_output_dir: &Path, local_date: &str) -> Result<PathBuf, Box<dyn Error>> {
    let dir = json_output_dir.join(local_date);
    if let Err(e) = fs::create_dir_all(&dir).await {
        error!(dir = %dir.display(), error = %e, "Failed to create output dir");
        return Err(e.into());
    }
    Ok(dir)
}

/// Serialize a [`Report`] as pretty JSON. Returns the written path.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir.display()))]
pub async fn write_report(report: &Report, json_output_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = date_dir(json_output_dir, &report.local_date)
        .await?
        .join(format!("{}.json", report.edition));
    fs::write(&path, json).await?;
    info!(path = %path.display(), articles = report.articles().count(), "Wrote report JSON");
    Ok(path)
}

/// Write a markdown digest next to the day's reports.
#[instrument(level = "info", skip_all, fields(days))]
pub async fn write_digest(
    markdown: &str,
    json_output_dir: &Path,
    local_date: &str,
    days: i64,
) -> Result<PathBuf, Box<dyn Error>> {
    let path = date_dir(json_output_dir, local_date)
        .await?
        .join(format!("digest-{days}d.md"));
    fs::write(&path, markdown).await?;
    info!(path = %path.display(), "Wrote digest");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{RunStats, SelectionResult};
    use crate::report::build_report;
    use crate::state::{LookbackWindow, WindowOrigin};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    #[tokio::test]
    async fn test_write_report_layout() {
        let dir = tempfile::tempdir().unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let window = LookbackWindow {
            start: end - Duration::hours(24),
            end,
            hours: 24,
            origin: WindowOrigin::Override,
        };
        let local = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap().and_hms_opt(12, 0, 0).unwrap();
        let report = build_report(SelectionResult::default(), &Config::default(), window, RunStats::default(), local);

        let path = write_report(&report, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("2025-03-10/afternoon.json"));
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["edition"], "afternoon");
        assert_eq!(value["window"]["hours"], 24);

        let md = write_digest("# d", dir.path(), "2025-03-10", 7).await.unwrap();
        assert!(md.ends_with("2025-03-10/digest-7d.md"));
    }
}
