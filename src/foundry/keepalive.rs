//! Background polling of the container runtime's internal job endpoints.
//!
//! Some stacks only consider a module responsive while it keeps draining
//! the injected job queue. The loop acknowledges every job it receives and
//! never drives pipeline work itself.
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use ureq::tls::{RootCerts, TlsConfig};

use super::client::parse_pem_bundle;
use super::env::env_trimmed;
use crate::redact;

const IDLE_SLEEP: Duration = Duration::from_millis(500);
const MAX_ERROR_SLEEP: Duration = Duration::from_secs(5);

/// One internal job handed out by the runtime. Jobs also carry a query
/// payload and per-job credentials; the acknowledge-only loop ignores them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub job_id: String,
    pub query_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JobEnvelope {
    compute_module_job_v1: Job,
}

/// Runtime endpoints and auth for the keepalive loop.
#[derive(Debug, Clone)]
pub struct Config {
    pub get_job_uri: String,
    pub post_result_uri: String,
    pub module_auth_token: String,
    pub default_ca_path: String,
}

/// Read the keepalive configuration. Returns `None` when the runtime did
/// not inject the job endpoints (local runs, plain batch containers); the
/// auth token and CA bundle are only required once it did.
pub fn load_config_from_env() -> Result<Option<Config>> {
    let get_job_uri = normalize_localhost_uri(&env_trimmed("GET_JOB_URI"));
    let post_result_uri = normalize_localhost_uri(&env_trimmed("POST_RESULT_URI"));
    if get_job_uri.is_empty() || post_result_uri.is_empty() {
        return Ok(None);
    }

    let module_auth_token = read_value_or_file(&env_trimmed("MODULE_AUTH_TOKEN"), "MODULE_AUTH_TOKEN")?;
    if module_auth_token.is_empty() {
        bail!("MODULE_AUTH_TOKEN is required when GET_JOB_URI/POST_RESULT_URI are set");
    }

    let default_ca_path = env_trimmed("DEFAULT_CA_PATH");
    if default_ca_path.is_empty() {
        bail!("DEFAULT_CA_PATH is required when GET_JOB_URI/POST_RESULT_URI are set");
    }

    Ok(Some(Config {
        get_job_uri,
        post_result_uri,
        module_auth_token,
        default_ca_path,
    }))
}

/// Poll the job endpoint forever, acknowledging each job through
/// `handle_job`. Fetch failures back off exponentially up to 5s; result
/// posts retry a few times with linear backoff before moving on.
pub fn run_loop(cfg: &Config, mut handle_job: impl FnMut(&Job) -> Result<Vec<u8>>) -> Result<()> {
    let agent = new_agent(&cfg.default_ca_path)?;
    tracing::info!(
        get_job_uri = %cfg.get_job_uri,
        "compute module client enabled, polling for jobs"
    );

    let mut error_sleep = IDLE_SLEEP;
    loop {
        let job = match get_next_job(&agent, cfg) {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(
                    error = %redact::secrets(&format!("{err:#}")),
                    "compute module client: get job failed"
                );
                thread::sleep(error_sleep);
                if error_sleep < MAX_ERROR_SLEEP {
                    error_sleep *= 2;
                }
                continue;
            }
        };
        error_sleep = IDLE_SLEEP;
        let Some(job) = job else {
            thread::sleep(IDLE_SLEEP);
            continue;
        };

        let job_id = job.job_id.trim().to_string();
        if job_id.is_empty() {
            tracing::warn!("compute module client: received job without jobId, skipping");
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        tracing::info!(
            job_id = %job_id,
            query_type = %job.query_type.trim(),
            "compute module client: received job"
        );
        let result = match handle_job(&job) {
            Ok(bytes) if bytes.is_empty() => b"ok".to_vec(),
            Ok(bytes) => bytes,
            Err(err) => {
                let message = redact::secrets(&format!("{err:#}"));
                tracing::warn!(
                    job_id = %job_id,
                    error = %message,
                    "compute module client: job handler failed"
                );
                // Still post a result so the platform records the failure.
                message.into_bytes()
            }
        };

        if let Err(err) = post_result(&agent, cfg, &job_id, &result) {
            tracing::warn!(
                job_id = %job_id,
                error = %redact::secrets(&format!("{err:#}")),
                "compute module client: post result failed"
            );
            for attempt in 1..=5u64 {
                thread::sleep(Duration::from_secs(attempt));
                if post_result(&agent, cfg, &job_id, &result).is_ok() {
                    break;
                }
            }
        }
    }
}

fn get_next_job(agent: &ureq::Agent, cfg: &Config) -> Result<Option<Job>> {
    let mut resp = agent
        .get(&cfg.get_job_uri)
        .header("Module-Auth-Token", cfg.module_auth_token.as_str())
        .header("Accept", "application/json")
        .call()?;
    let status = resp.status();
    if status == ureq::http::StatusCode::NO_CONTENT {
        return Ok(None);
    }
    let body = resp
        .body_mut()
        .read_to_string()
        .context("read get job response")?;
    if !status.is_success() {
        bail!("GET job: status={} body={}", status.as_u16(), body.trim());
    }
    Ok(Some(parse_job_envelope(&body)?))
}

fn parse_job_envelope(body: &str) -> Result<Job> {
    let envelope: JobEnvelope = serde_json::from_str(body)
        .map_err(|err| anyhow!("parse GET job response: {err} (body={})", body.trim()))?;
    Ok(envelope.compute_module_job_v1)
}

fn post_result(agent: &ureq::Agent, cfg: &Config, job_id: &str, result: &[u8]) -> Result<()> {
    let url = result_url(&cfg.post_result_uri, job_id);
    let mut resp = agent
        .post(&url)
        .header("Module-Auth-Token", cfg.module_auth_token.as_str())
        .header("Content-Type", "application/octet-stream")
        .send(result)?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.body_mut().read_to_string().unwrap_or_default();
        bail!("POST result: status={} body={}", status.as_u16(), body.trim());
    }
    Ok(())
}

/// Join the result URI and job id, collapsing dot segments in the id so it
/// cannot climb out of the result endpoint's path.
fn result_url(base: &str, job_id: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in job_id.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("{}/{}", base, segments.join("/"))
}

/// The runtime injects localhost URIs, but its sidecar often binds only the
/// IPv4 loopback. Rewrite localhost/::1 hosts to 127.0.0.1 so polling does
/// not flap between address families. Anything unparseable passes through.
fn normalize_localhost_uri(raw: &str) -> String {
    let raw = raw.trim();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return raw.to_string();
    };
    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    let (host, port) = split_host_port(authority);
    if host == "localhost" || host == "::1" {
        if port.is_empty() {
            return format!("{scheme}://127.0.0.1{path}");
        }
        return format!("{scheme}://127.0.0.1:{port}{path}");
    }
    raw.to_string()
}

fn split_host_port(authority: &str) -> (&str, &str) {
    if let Some(bracketed) = authority.strip_prefix('[') {
        if let Some((host, after)) = bracketed.split_once(']') {
            return (host, after.strip_prefix(':').unwrap_or(""));
        }
        return (authority, "");
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (host, port)
        }
        _ => (authority, ""),
    }
}

/// Secrets may be injected as literal values or as file paths. Multi-line
/// values are always literal; otherwise an existing regular file wins.
fn read_value_or_file(value: &str, var: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    if value.contains('\n') || value.contains('\r') {
        return Ok(value.to_string());
    }
    let path = Path::new(value);
    if path.is_file() {
        let text = fs::read_to_string(path).with_context(|| format!("read {var} file"))?;
        return Ok(text.trim().to_string());
    }
    Ok(value.to_string())
}

fn new_agent(ca_path: &str) -> Result<ureq::Agent> {
    let pem = fs::read(ca_path).context("read DEFAULT_CA_PATH")?;
    let certs = parse_pem_bundle(&pem)?;
    if certs.is_empty() {
        bail!("parse DEFAULT_CA_PATH PEM: no certs found");
    }
    let tls = TlsConfig::builder()
        .root_certs(RootCerts::new_with_certs(&certs))
        .build();
    Ok(ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(30)))
        .http_status_as_error(false)
        .tls_config(tls)
        .build()
        .new_agent())
}

#[cfg(test)]
#[path = "keepalive_tests.rs"]
mod tests;
