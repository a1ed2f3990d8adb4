//! Source credentials injected by the platform for outbound connections.
//!
//! `SOURCE_CREDENTIALS` names a JSON file mapping each configured source's
//! API name to its secret map. Key inference for the enricher lives in the
//! config layer; this type only loads and looks things up.
use std::collections::BTreeMap;
use std::env;
use std::fs;

use anyhow::{bail, Context, Result};

/// Parsed contents of the `SOURCE_CREDENTIALS` file: source API name to
/// secret name to secret value.
#[derive(Debug, Clone, Default)]
pub struct SourceCredentials(BTreeMap<String, BTreeMap<String, String>>);

impl SourceCredentials {
    /// Read and parse the file named by `SOURCE_CREDENTIALS`.
    pub fn load_from_env() -> Result<Self> {
        let path = env::var("SOURCE_CREDENTIALS").unwrap_or_default();
        let path = path.trim();
        if path.is_empty() {
            bail!("SOURCE_CREDENTIALS is not set");
        }
        let text = fs::read_to_string(path).context("read SOURCE_CREDENTIALS file")?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let map = serde_json::from_str(text).context("parse SOURCE_CREDENTIALS JSON")?;
        Ok(Self(map))
    }

    /// Source API names present in the file, sorted, blank keys skipped.
    pub fn source_names(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
            .collect()
    }

    /// Secret names for one source, sorted, blank keys skipped.
    pub fn secret_names(&self, source_api_name: &str) -> Vec<&str> {
        let Some(source) = self.0.get(source_api_name.trim()) else {
            return Vec::new();
        };
        source
            .keys()
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
            .collect()
    }

    pub fn contains_source(&self, source_api_name: &str) -> bool {
        self.0.contains_key(source_api_name.trim())
    }

    /// The only source's name, when the file holds exactly one entry.
    pub fn sole_source(&self) -> Option<&str> {
        if self.0.len() == 1 {
            self.0.keys().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Look up one secret, trimmed. REST-style sources expose
    /// `additionalSecret<Name>` keys; both the plain and prefixed forms
    /// are tried.
    pub fn get_secret(&self, source_api_name: &str, secret_name: &str) -> Option<&str> {
        let source_api_name = source_api_name.trim();
        let secret_name = secret_name.trim();
        if source_api_name.is_empty() || secret_name.is_empty() {
            return None;
        }
        let source = self.0.get(source_api_name)?;
        for key in [secret_name.to_string(), format!("additionalSecret{secret_name}")] {
            if let Some(value) = source.get(&key) {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "sources_tests.rs"]
mod tests;
