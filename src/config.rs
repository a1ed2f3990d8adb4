//! Environment-driven configuration for the pool and the enricher.
//!
//! Flag defaults come from these values, so every knob can be set either
//! way: `WORKERS`, `MAX_RETRIES`, `REQUEST_TIMEOUT`, `RATE_LIMIT_RPS` and
//! `FAIL_FAST` for the pool; the `GEMINI_*` family for the enricher, with
//! the API key resolvable from `SOURCE_CREDENTIALS` when unset.
use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::foundry::SourceCredentials;

/// Secret names commonly used for API keys in source credentials.
const API_KEY_SECRET_CANDIDATES: [&str; 5] =
    ["GEMINI_API_KEY", "GeminiAPIKey", "apiKey", "api_key", "apikey"];

/// Worker-pool defaults read from the environment. Flags override these
/// per invocation.
#[derive(Debug, Clone)]
pub struct PipelineEnv {
    pub workers: usize,
    pub max_retries: usize,
    pub request_timeout: Duration,
    pub rate_limit_rps: f64,
    pub fail_fast: bool,
}

pub fn pipeline_env() -> Result<PipelineEnv> {
    Ok(PipelineEnv {
        workers: env_usize("WORKERS", 10)?,
        max_retries: env_usize("MAX_RETRIES", 3)?,
        request_timeout: env_duration("REQUEST_TIMEOUT", Duration::from_secs(30))?,
        rate_limit_rps: env_f64("RATE_LIMIT_RPS", 0.0)?,
        fail_fast: env_bool("FAIL_FAST")?,
    })
}

/// Enricher configuration from the environment. The API key may be passed
/// directly, as a file path, or through platform source credentials.
#[derive(Debug, Clone)]
pub struct GeminiEnv {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub capture_audit: bool,
}

pub fn gemini_env() -> Result<GeminiEnv> {
    Ok(GeminiEnv {
        api_key: load_gemini_api_key()?,
        model: env_trimmed("GEMINI_MODEL"),
        base_url: env_trimmed("GEMINI_BASE_URL"),
        capture_audit: env_bool("GEMINI_CAPTURE_AUDIT")?,
    })
}

fn load_gemini_api_key() -> Result<String> {
    // Explicit injection wins.
    let explicit = env_trimmed("GEMINI_API_KEY");
    if !explicit.is_empty() {
        let key = read_value_or_file(&explicit, "GEMINI_API_KEY")?;
        if key.is_empty() {
            bail!("GEMINI_API_KEY is required");
        }
        return Ok(key);
    }

    // Fall back to the credentials file the platform mounts for sources.
    let creds = SourceCredentials::load_from_env().map_err(|err| {
        anyhow!("GEMINI_API_KEY is required (or configure Sources and provide SOURCE_CREDENTIALS): {err:#}")
    })?;
    let source_api_name = env_trimmed("GEMINI_SOURCE_API_NAME");
    let secret_name = env_trimmed("GEMINI_SOURCE_SECRET_NAME");
    resolve_source_api_key(&creds, &source_api_name, &secret_name)
}

/// Pick the Gemini key out of the source credentials, preferring an
/// explicit source/secret name and inferring only when unambiguous.
fn resolve_source_api_key(
    creds: &SourceCredentials,
    source_api_name: &str,
    secret_name: &str,
) -> Result<String> {
    if !source_api_name.is_empty() {
        if let Some(key) = pick_secret_from_source(creds, source_api_name, secret_name)? {
            return Ok(key);
        }
        bail!(
            "could not find Gemini API key in SOURCE_CREDENTIALS for source {:?} \
             (available secrets: {:?}); set GEMINI_SOURCE_SECRET_NAME or GEMINI_API_KEY",
            source_api_name,
            creds.secret_names(source_api_name)
        );
    }

    if let Some(only) = creds.sole_source() {
        if let Some(key) = pick_secret_from_source(creds, only, secret_name)? {
            return Ok(key);
        }
        bail!(
            "could not infer Gemini API key from SOURCE_CREDENTIALS (source {:?} has \
             secrets {:?}); set GEMINI_SOURCE_SECRET_NAME or GEMINI_API_KEY",
            only,
            creds.secret_names(only)
        );
    }

    // Multiple sources: accept only a single unambiguous match.
    let mut matches: Vec<String> = Vec::new();
    for source in creds.source_names() {
        if let Ok(Some(key)) = pick_secret_from_source(creds, source, secret_name) {
            matches.push(key);
        }
    }
    if matches.len() == 1 {
        return Ok(matches.remove(0));
    }
    if matches.len() > 1 {
        bail!(
            "multiple Sources in SOURCE_CREDENTIALS could provide the Gemini API key; \
             set GEMINI_SOURCE_API_NAME (available sources: {:?})",
            creds.source_names()
        );
    }
    bail!(
        "could not infer Gemini API key from SOURCE_CREDENTIALS; set GEMINI_SOURCE_API_NAME \
         and GEMINI_SOURCE_SECRET_NAME (available sources: {:?})",
        creds.source_names()
    )
}

fn pick_secret_from_source(
    creds: &SourceCredentials,
    source_api_name: &str,
    preferred_secret_name: &str,
) -> Result<Option<String>> {
    let source_api_name = source_api_name.trim();
    if source_api_name.is_empty() {
        bail!("GEMINI_SOURCE_API_NAME is empty");
    }
    if !creds.contains_source(source_api_name) {
        bail!(
            "SOURCE_CREDENTIALS missing source {:?} (available sources: {:?})",
            source_api_name,
            creds.source_names()
        );
    }

    // An explicit secret name is respected verbatim.
    let preferred = preferred_secret_name.trim();
    if !preferred.is_empty() {
        return Ok(creds.get_secret(source_api_name, preferred).map(str::to_string));
    }

    for candidate in API_KEY_SECRET_CANDIDATES {
        if let Some(key) = creds.get_secret(source_api_name, candidate) {
            return Ok(Some(key.to_string()));
        }
    }

    // A lone secret is assumed to be the key.
    let names = creds.secret_names(source_api_name);
    if let [only] = names.as_slice() {
        return Ok(creds.get_secret(source_api_name, only).map(str::to_string));
    }
    Ok(None)
}

/// Platforms may inject secrets as file paths. Values that look like paths
/// are read from disk; anything else is the literal value.
fn read_value_or_file(value: &str, var: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    if looks_like_path(value) {
        let text = fs::read_to_string(value).with_context(|| format!("read {var} file"))?;
        return Ok(text.trim().to_string());
    }
    Ok(value.to_string())
}

/// Conservative so a literal key is never mistaken for a file name.
fn looks_like_path(value: &str) -> bool {
    value.starts_with('/')
        || value.starts_with("./")
        || value.starts_with("../")
        || value.contains('/')
}

fn env_trimmed(var: &str) -> String {
    env::var(var).unwrap_or_default().trim().to_string()
}

fn env_usize(var: &str, fallback: usize) -> Result<usize> {
    let raw = env_trimmed(var);
    if raw.is_empty() {
        return Ok(fallback);
    }
    raw.parse().with_context(|| format!("invalid {var}={raw:?}"))
}

fn env_f64(var: &str, fallback: f64) -> Result<f64> {
    let raw = env_trimmed(var);
    if raw.is_empty() {
        return Ok(fallback);
    }
    raw.parse().with_context(|| format!("invalid {var}={raw:?}"))
}

fn env_bool(var: &str) -> Result<bool> {
    let raw = env_trimmed(var);
    if raw.is_empty() {
        return Ok(false);
    }
    parse_bool(&raw).with_context(|| format!("invalid {var}={raw:?}"))
}

fn env_duration(var: &str, fallback: Duration) -> Result<Duration> {
    let raw = env_trimmed(var);
    if raw.is_empty() {
        return Ok(fallback);
    }
    parse_duration(&raw).with_context(|| format!("invalid {var}={raw:?}"))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => bail!("invalid boolean {raw:?}"),
    }
}

/// Parse a duration written with explicit units: decimal numbers followed
/// by ns/us/ms/s/m/h, concatenated segments allowed ("1m30s"). A bare "0"
/// is zero; a bare number without a unit is an error.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let text = raw.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    let mut rest = text;
    let mut total = 0.0_f64;
    let mut any = false;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| anyhow!("invalid duration {raw:?}"))?;
        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let multiplier = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => bail!("invalid duration {raw:?}"),
        };
        rest = &rest[unit_len..];
        total += number * multiplier;
        any = true;
    }
    if !any {
        bail!("invalid duration {raw:?}");
    }
    Duration::try_from_secs_f64(total).map_err(|_| anyhow!("invalid duration {raw:?}"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
