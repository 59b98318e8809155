//! # Curated News
//!
//! A batch news curation pipeline. One invocation reads a list of feed and
//! site URLs, fetches every feed, collapses duplicate coverage of the same
//! story, classifies and scores what is left, and writes a diverse selection
//! as a structured JSON report.
//!
//! ## Usage
//!
//! ```sh
//! curated_news -s sources.txt -j ./json
//! ```
//!
//! ## Architecture
//!
//! 1. **Registry**: source list to feed endpoints
//! 2. **Fetching**: feeds in parallel, aggregator links resolved
//! 3. **Normalizing and clustering**: uniform articles, TF-IDF duplicate groups
//! 4. **Classifying, scoring, selecting**: categories, composite score, diversity caps
//! 5. **Output**: JSON report, optional article store and digest
//!
//! The run state is only advanced when at least one feed was fetched.

use chrono::{Local, Utc};
use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cache;
mod classify;
mod cli;
mod cluster;
mod config;
mod digest;
mod error;
mod fetcher;
mod http;
mod models;
mod normalize;
mod outputs;
mod pipeline;
mod report;
mod score;
mod select;
mod sources;
mod state;
mod store;
mod utils;

use classify::{GazetteerExtractor, NoopExtractor};
use cli::Cli;
use config::Config;
use digest::{ChatClient, RetrySummarize, generate_digest};
use http::{ReqwestClient, RetryClient};
use outputs::json;
use pipeline::RunOutcome;
use state::{RunStateTracker, compute_window};
use store::{ArticleStore, JsonlStore};
use utils::ensure_writable_dir;

/// Apply command-line overrides to the merged configuration.
fn apply_overrides(config: &mut Config, args: &Cli) {
    if let Some(top) = args.top {
        config.selection.top_n = top;
    }
    if let Some(v) = args.other_min {
        config.selection.other_min = v;
    }
    if let Some(v) = args.other_max {
        config.selection.other_max = v;
    }
    if let Some(v) = args.max_per_source {
        config.selection.max_per_source = v;
    }
    if let Some(v) = args.workers {
        config.pipeline.workers = v;
    }
    if let Some(v) = args.timeout_secs {
        config.pipeline.timeout_secs = v;
    }
    if args.precision {
        config.classifier.precision = true;
    }
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("curated_news starting up");

    let args = Cli::parse();
    debug!(?args.sources, ?args.json_output_dir, ?args.config, ?args.preset, "Parsed CLI arguments");

    let mut config = Config::load(args.config.as_deref())?;
    if args.list_presets {
        println!("Available presets:");
        for line in config.describe_presets() {
            println!("  {line}");
        }
        return Ok(());
    }
    let preset = match &args.preset {
        Some(name) => Some(config.apply_preset(name)?),
        None => None,
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    // clap enforces both unless --list-presets was given.
    let (Some(sources_path), Some(json_output_dir)) = (args.sources.as_deref(), args.json_output_dir.as_deref()) else {
        return Err("--sources and --json-output-dir are required".into());
    };
    let hours = args.hours.or(preset.as_ref().and_then(|p| p.hours));
    let categories = match preset {
        Some(p) if args.categories.is_empty() => p.categories,
        _ => args.categories.clone(),
    };

    if let Err(e) = ensure_writable_dir(json_output_dir).await {
        error!(
            path = %json_output_dir.display(),
            error = %e,
            "JSON output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let sources = sources::load_source_file(sources_path, &config)?;
    if sources.is_empty() {
        warn!(path = %sources_path.display(), "Source list is empty");
    }
    info!(count = sources.len(), "Loaded sources");

    // ---- Lookback window ----
    let tracker = RunStateTracker::new(&args.state_file);
    let last_run_at = tracker.read().await;
    let window = compute_window(Utc::now(), last_run_at, hours, &config.pipeline);
    info!(
        hours = window.hours,
        origin = ?window.origin,
        start = %window.start.to_rfc3339(),
        "Lookback window"
    );

    // ---- Run ----
    let client = RetryClient::new(
        ReqwestClient::new(&config.pipeline.user_agent, Duration::from_secs(config.pipeline.timeout_secs))?,
        config.pipeline.max_retries,
        Duration::from_millis(config.pipeline.retry_backoff_ms),
    );
    let local_now = Local::now().naive_local();
    let outcome: RunOutcome = if config.classifier.precision {
        let extractor = GazetteerExtractor::new(&config.entities);
        pipeline::run(&sources, &config, &client, extractor, window, &categories, local_now).await
    } else {
        pipeline::run(&sources, &config, &client, NoopExtractor, window, &categories, local_now).await
    };

    let stats = outcome.stats();
    info!(
        sources = stats.sources_attempted,
        skipped = stats.sources_skipped,
        feeds_ok = stats.feeds_succeeded,
        feeds_failed = stats.feeds_failed,
        in_window = stats.articles_in_window,
        clusters = stats.clusters,
        "Run statistics"
    );
    if outcome.report.is_empty() {
        warn!("No stories selected for this window");
    }
    if args.explain {
        report::log_explanation(&outcome.report, 10);
    }

    json::write_report(&outcome.report, json_output_dir).await?;

    // ---- Article store ----
    if let Some(path) = &args.store {
        let store = JsonlStore::new(path);
        let articles: Vec<models::Article> = outcome.report.articles().cloned().collect();
        if let Err(e) = store.insert(&articles, window.end).await {
            error!(path = %path.display(), error = %e, "Failed to store articles");
        }
        if let Some(days) = args.store_retention_days {
            if let Err(e) = store.prune(days, window.end).await {
                error!(path = %path.display(), error = %e, "Failed to prune store");
            }
        }

        if let Some(days) = args.digest_days {
            let chat = ChatClient::new(
                &args.ai_endpoint,
                &args.ai_model,
                args.ai_api_key.clone(),
                Duration::from_secs(120),
            )?;
            let summarizer = RetrySummarize::new(chat, 5, Duration::from_secs(1));
            match generate_digest(&store, &summarizer, days, window.end, &config).await {
                Ok(Some(md)) => {
                    json::write_digest(&md, json_output_dir, &outcome.report.local_date, days).await?;
                }
                Ok(None) => info!(days, "Nothing stored for digest"),
                Err(e) => error!(error = %e, "Digest generation failed"),
            }
        }
    }

    // ---- Run state ----
    if outcome.fetch_succeeded {
        if let Err(e) = tracker.write(window.end).await {
            error!(path = %tracker.path().display(), error = %e, "Failed to update run state");
        }
    } else {
        warn!("No feed fetched successfully; run state left unchanged");
    }

    info!(elapsed_ms = start_time.elapsed().as_millis() as u64, "curated_news finished");
    Ok(())
}
