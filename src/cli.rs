//! Command-line interface definitions.
//!
//! Every flag here overrides the merged YAML configuration for one run.
//! Secrets can come from the environment.

use clap::Parser;
use std::path::PathBuf;

/// Curated news: fetch, cluster, classify, score and select the day's stories.
///
/// # Examples
///
/// ```sh
/// # Basic run
/// curated_news -s sources.txt -j ./json
///
/// # AI-focused preset, overriding its list size
/// curated_news -s sources.txt -j ./json --preset ai_focus --top 25
///
/// # Last 12 hours, only two categories, with score explanations
/// curated_news -s sources.txt -j ./json --hours 12 --categories ai_headlines,cybersecurity --explain
///
/// # Keep history and write a weekly digest
/// curated_news -s sources.txt -j ./json --store ./articles.jsonl --digest-days 7 \
///     --ai-endpoint http://localhost:11434/v1 --ai-model llama3
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Source list: one feed or site URL per line, optional category hint after it
    #[arg(short, long, required_unless_present = "list_presets")]
    pub sources: Option<PathBuf>,

    /// Output directory for the JSON report
    #[arg(short, long, required_unless_present = "list_presets")]
    pub json_output_dir: Option<PathBuf>,

    /// Optional YAML file merged over the built-in configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Named preset from the configuration (lookback, list sizes, categories, weights)
    #[arg(short, long)]
    pub preset: Option<String>,

    /// Print the configured presets and exit
    #[arg(long)]
    pub list_presets: bool,

    /// File holding the last successful run time
    #[arg(long, default_value = ".curated_news_last_run")]
    pub state_file: PathBuf,

    /// Lookback window in hours, ignoring the run state
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
    pub hours: Option<i64>,

    /// Size of the main list
    #[arg(long)]
    pub top: Option<usize>,

    /// Minimum size of the "other interesting" list
    #[arg(long)]
    pub other_min: Option<usize>,

    /// Maximum size of the "other interesting" list
    #[arg(long)]
    pub other_max: Option<usize>,

    /// Per-source cap across the selection
    #[arg(long)]
    pub max_per_source: Option<usize>,

    /// Concurrent network workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Restrict output to these primary categories (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Add entity-based signal to classification
    #[arg(long)]
    pub precision: bool,

    /// JSON-lines article store for history and digests
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Drop stored articles older than this many days
    #[arg(long)]
    pub store_retention_days: Option<i64>,

    /// Log the score breakdown of the top stories
    #[arg(long)]
    pub explain: bool,

    /// Write a digest of the last N stored days (requires --store)
    #[arg(long, requires = "store")]
    pub digest_days: Option<i64>,

    /// OpenAI-compatible API base URL for digests
    #[arg(long, env = "AI_ENDPOINT", default_value = "https://api.openai.com/v1")]
    pub ai_endpoint: String,

    /// Model name for digests
    #[arg(long, env = "AI_MODEL", default_value = "gpt-4o-mini")]
    pub ai_model: String,

    /// API key for the digest endpoint
    #[arg(long, env = "AI_API_KEY", hide_env_values = true)]
    pub ai_api_key: Option<String>,
}
