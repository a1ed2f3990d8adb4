//! Command-line surface for the enricher binary.
//!
//! Two modes share one set of tuning flags: `local` reads and writes CSV
//! files, `foundry` runs against platform datasets and streams. Flags left
//! unset fall back to the environment-derived defaults in [`crate::config`].
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "enricher",
    version,
    about = "Batch email enrichment over Gemini, against local CSVs or Foundry datasets",
    after_help = "Examples:\n  enricher local --input emails.csv --output enriched.csv\n  enricher foundry --output-write-mode auto\n\nEnvironment (foundry):\n  FOUNDRY_URL         Foundry base URL (e.g. https://<stack>.palantirfoundry.com)\n  BUILD2_TOKEN        File path containing a bearer token\n  RESOURCE_ALIAS_MAP  File path containing alias -> {rid, branch} JSON\n\nEnvironment (Gemini):\n  GEMINI_API_KEY        Gemini API key: the literal key or a file path containing it\n  GEMINI_MODEL          Gemini model name (required)\n  GEMINI_BASE_URL       Optional base URL override (proxies/testing)\n  GEMINI_CAPTURE_AUDIT  If true/1, include sources/queries in output\n\nEnvironment (Foundry Sources, optional):\n  SOURCE_CREDENTIALS         File path with a JSON dictionary of Source credentials\n  GEMINI_SOURCE_API_NAME     Source API name to read the Gemini key from\n  GEMINI_SOURCE_SECRET_NAME  Secret name within that Source (inferred if omitted)",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run against a local input CSV (Gemini required)
    Local(LocalArgs),
    /// Run in Foundry pipeline mode (uses BUILD2_TOKEN + RESOURCE_ALIAS_MAP)
    Foundry(FoundryArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Enrich a local CSV file")]
pub struct LocalArgs {
    /// Input CSV file path (must include an 'email' column)
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,

    /// Output CSV file path
    #[arg(long, value_name = "PATH")]
    pub output: PathBuf,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Enrich platform datasets or streams resolved via aliases")]
pub struct FoundryArgs {
    /// Alias name for the input dataset in RESOURCE_ALIAS_MAP
    #[arg(long, value_name = "ALIAS", default_value = "input")]
    pub input_alias: String,

    /// Alias name for the output dataset in RESOURCE_ALIAS_MAP
    #[arg(long, value_name = "ALIAS", default_value = "output")]
    pub output_alias: String,

    /// Filename to upload into the output dataset transaction (dataset mode only)
    #[arg(long, value_name = "NAME", default_value = "enriched.csv")]
    pub output_filename: String,

    /// Output write mode: auto|dataset|stream (auto probes the stream proxy first)
    #[arg(long, value_name = "MODE", default_value = "auto")]
    pub output_write_mode: String,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

/// Tuning flags shared by both modes. Every flag has an environment twin
/// consulted when the flag is absent.
#[derive(Args, Debug, Default)]
pub struct TuningArgs {
    /// Number of concurrent enrichment workers (env: WORKERS)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Max retries per email for transient failures (env: MAX_RETRIES)
    #[arg(long, value_name = "N")]
    pub max_retries: Option<usize>,

    /// Per-email request timeout, e.g. 30s or 500ms (env: REQUEST_TIMEOUT)
    #[arg(long, value_name = "DURATION")]
    pub request_timeout: Option<String>,

    /// Global request rate limit (RPS), 0 disables (env: RATE_LIMIT_RPS)
    #[arg(long, value_name = "RPS")]
    pub rate_limit_rps: Option<f64>,

    /// Fail fast on the first enrichment error (env: FAIL_FAST)
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub fail_fast: Option<bool>,

    /// Gemini model name (env: GEMINI_MODEL)
    #[arg(long, value_name = "MODEL")]
    pub gemini_model: Option<String>,

    /// Gemini API base URL override, for proxies and tests (env: GEMINI_BASE_URL)
    #[arg(long, value_name = "URL")]
    pub gemini_base_url: Option<String>,

    /// Capture grounding sources and queries into the output (env: GEMINI_CAPTURE_AUDIT)
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub capture_audit: Option<bool>,
}
