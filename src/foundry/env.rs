//! Container environment contract: service discovery, token file, and the
//! resource alias map that names the datasets a run may touch.
use std::collections::HashMap;
use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// A dataset (or stream) RID plus the branch to read or write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetRef {
    pub rid: String,
    pub branch: String,
}

/// Discovered platform service base URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Services {
    pub api_gateway: String,
    pub stream_proxy: String,
}

/// Runtime configuration for pipeline mode, read from the environment the
/// platform injects into the container.
#[derive(Debug, Clone, Default)]
pub(crate) struct Env {
    pub services: Services,
    /// Optional PEM bundle to trust for TLS, from `DEFAULT_CA_PATH`.
    pub default_ca_path: String,
    pub token: String,
    pub aliases: HashMap<String, DatasetRef>,
}

/// Read the pipeline-mode environment.
///
/// `BUILD2_TOKEN` and `RESOURCE_ALIAS_MAP` hold file paths, not values; the
/// files are read here. Service URLs come from the
/// `FOUNDRY_SERVICE_DISCOVERY_V2` file, or from `FOUNDRY_URL` when discovery
/// is not present.
pub fn load_env() -> Result<Env> {
    let services = load_services()?;
    let default_ca_path = env_trimmed("DEFAULT_CA_PATH");
    let token = read_file_env("BUILD2_TOKEN")?;
    let aliases = read_alias_map_env("RESOURCE_ALIAS_MAP")?;
    Ok(Env {
        services,
        default_ca_path,
        token,
        aliases,
    })
}

pub(crate) fn env_trimmed(var: &str) -> String {
    env::var(var).unwrap_or_default().trim().to_string()
}

fn load_services() -> Result<Services> {
    let discovery_path = env_trimmed("FOUNDRY_SERVICE_DISCOVERY_V2");
    if !discovery_path.is_empty() {
        let text = fs::read_to_string(&discovery_path)
            .context("read FOUNDRY_SERVICE_DISCOVERY_V2 file")?;
        return parse_service_discovery(&text);
    }

    // Back-compat: an explicit FOUNDRY_URL when service discovery is absent.
    let foundry_url = env_trimmed("FOUNDRY_URL");
    if foundry_url.is_empty() {
        bail!("FOUNDRY_SERVICE_DISCOVERY_V2 or FOUNDRY_URL is required");
    }
    Ok(services_from_base_url(&foundry_url))
}

/// Parse the discovery file format used in platform containers: each service
/// id maps to a single-element list holding the base URL.
fn parse_service_discovery(text: &str) -> Result<Services> {
    let raw: HashMap<String, Vec<String>> =
        serde_yaml::from_str(text).context("parse FOUNDRY_SERVICE_DISCOVERY_V2 YAML")?;

    let get_one = |key: &str| -> Option<String> {
        raw.get(key)
            .and_then(|vals| vals.first())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let Some(api_gateway) = get_one("api_gateway") else {
        bail!("FOUNDRY_SERVICE_DISCOVERY_V2 missing api_gateway");
    };
    let Some(stream_proxy) = get_one("stream_proxy") else {
        bail!("FOUNDRY_SERVICE_DISCOVERY_V2 missing stream_proxy");
    };
    Ok(Services {
        api_gateway,
        stream_proxy,
    })
}

fn services_from_base_url(raw: &str) -> Services {
    let mut base = raw.trim().to_string();
    if !base.contains("://") {
        base = format!("https://{base}");
    }
    let base = base.trim_end_matches('/');
    Services {
        api_gateway: format!("{base}/api"),
        stream_proxy: format!("{base}/stream-proxy/api"),
    }
}

fn read_file_env(var: &str) -> Result<String> {
    let path = env_trimmed(var);
    if path.is_empty() {
        bail!("{var} is required");
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {var} file"))?;
    Ok(text.trim().to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AliasEntry {
    rid: String,
    branch: Option<String>,
}

fn read_alias_map_env(var: &str) -> Result<HashMap<String, DatasetRef>> {
    let path = env_trimmed(var);
    if path.is_empty() {
        bail!("{var} is required");
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {var} file"))?;
    parse_alias_map(&text, var)
}

fn parse_alias_map(text: &str, var: &str) -> Result<HashMap<String, DatasetRef>> {
    let raw: HashMap<String, AliasEntry> =
        serde_json::from_str(text).with_context(|| format!("parse {var} JSON"))?;
    let mut out = HashMap::with_capacity(raw.len());
    for (alias, entry) in raw {
        if entry.rid.trim().is_empty() {
            bail!("alias {alias:?}: rid is required");
        }
        let branch = entry
            .branch
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        out.insert(
            alias,
            DatasetRef {
                rid: entry.rid,
                branch,
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
