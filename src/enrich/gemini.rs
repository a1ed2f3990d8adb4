//! Gemini REST enricher with web-search grounding and structured JSON
//! output. Transient API conditions come back tagged for pool retry.
use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::{Enricher, Enrichment};
use crate::pool::{Ctx, Retry};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    /// Overrides the Gemini API base URL. Useful for proxies and tests.
    pub base_url: String,
    /// Extract grounding sources and search queries into the output.
    pub capture_audit: bool,
}

pub struct GeminiEnricher {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    model: String,
    capture_audit: bool,
}

impl GeminiEnricher {
    pub fn new(cfg: GeminiConfig) -> Result<Self> {
        let api_key = cfg.api_key.trim().to_string();
        if api_key.is_empty() {
            bail!("GEMINI_API_KEY is required");
        }
        let model = cfg.model.trim().to_string();
        if model.is_empty() {
            bail!("GEMINI_MODEL is required");
        }
        let mut base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            base_url = DEFAULT_BASE_URL.to_string();
        }
        // Non-2xx responses are inspected for retryability, not treated as
        // transport errors.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Ok(Self {
            agent,
            base_url,
            api_key,
            model,
            capture_audit: cfg.capture_audit,
        })
    }

    fn request_body(&self, email: &str) -> serde_json::Value {
        json!({
            "contents": [{"parts": [{"text": build_prompt(email)}]}],
            "tools": [{"google_search": {}}, {"url_context": {}}],
            "generationConfig": {
                "candidateCount": 1,
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "linkedin_url": {"type": "STRING"},
                        "company": {"type": "STRING"},
                        "title": {"type": "STRING"},
                        "description": {"type": "STRING"},
                        "confidence": {"type": "STRING"},
                    },
                    "required": [
                        "linkedin_url",
                        "company",
                        "title",
                        "description",
                        "confidence",
                    ],
                },
            },
        })
    }
}

impl Enricher for GeminiEnricher {
    fn enrich(&self, ctx: &Ctx, email: &str) -> Result<Enrichment> {
        let email = email.trim();
        if email.is_empty() {
            bail!("empty email");
        }

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let mut req = self.agent.post(&url).header("x-goog-api-key", &self.api_key);
        if let Some(remaining) = ctx.remaining() {
            req = req.config().timeout_global(Some(remaining)).build();
        }
        let mut resp = req
            .send_json(&self.request_body(email))
            .map_err(classify_transport)?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.body_mut().read_to_string().unwrap_or_default();
            return Err(classify_api_error(status, &body));
        }

        let parsed: GenerateContentResponse = resp
            .body_mut()
            .read_json()
            .context("gemini: parse response json")?;
        let fields: StructuredFields = serde_json::from_str(&parsed.text())
            .context("gemini: parse structured json")?;

        let mut out = Enrichment {
            linkedin_url: fields.linkedin_url.trim().to_string(),
            company: fields.company.trim().to_string(),
            title: fields.title.trim().to_string(),
            description: fields.description.trim().to_string(),
            confidence: fields.confidence.trim().to_string(),
            model: self.model.clone(),
            ..Enrichment::default()
        };
        if self.capture_audit {
            out.sources = extract_sources(&parsed);
            out.web_search_queries = extract_web_search_queries(&parsed);
        }
        Ok(out)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn build_prompt(email: &str) -> String {
    // Keep this prompt public-safe: no secrets, and no PII beyond the email
    // itself (the required input).
    format!(
        "You are a data enrichment tool. Given an email address, use web search and URL context to find likely public profile/company information.\n\
         \n\
         Return ONLY a single JSON object with these keys:\n\
         - linkedin_url (string)\n\
         - company (string)\n\
         - title (string)\n\
         - description (string)\n\
         - confidence (string; one of: low, medium, high)\n\
         \n\
         Rules:\n\
         - If you cannot find a field, set it to an empty string.\n\
         - Do not include extra keys.\n\
         \n\
         Email: {email}"
    )
}

fn classify_transport(err: ureq::Error) -> anyhow::Error {
    let transient = match &err {
        ureq::Error::Timeout(_) | ureq::Error::ConnectionFailed => true,
        ureq::Error::Io(io_err) => matches!(
            io_err.kind(),
            std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    };
    if transient {
        Retry::transient(err)
    } else {
        anyhow::Error::new(err)
    }
}

/// Tag retryable API responses: 429 and 5xx retry under the pool budget;
/// an upstream CANCELLED (499) allows a single extra attempt.
fn classify_api_error(http_status: u16, body: &str) -> anyhow::Error {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let detail = envelope.error;
    let message = if detail.message.is_empty() {
        format!("gemini api error: status={http_status}")
    } else if detail.status.is_empty() {
        format!("gemini api error: status={http_status} {}", detail.message)
    } else {
        format!(
            "gemini api error: status={http_status} {}: {}",
            detail.status, detail.message
        )
    };
    let err = anyhow::anyhow!("{message}");
    if http_status == 429 || (500..600).contains(&http_status) {
        return Retry::transient(err);
    }
    if http_status == 499 && detail.status.eq_ignore_ascii_case("CANCELLED") {
        return Retry::capped(err, 1);
    }
    err
}

fn extract_sources(resp: &GenerateContentResponse) -> Vec<String> {
    let Some(c) = resp.candidates.first() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for chunk in &c.grounding_metadata.grounding_chunks {
        out.push(chunk.web.uri.clone());
    }
    for m in &c.url_context_metadata.url_metadata {
        out.push(m.retrieved_url.clone());
    }
    dedupe_preserve_order(out)
}

fn extract_web_search_queries(resp: &GenerateContentResponse) -> Vec<String> {
    match resp.candidates.first() {
        Some(c) => dedupe_preserve_order(c.grounding_metadata.web_search_queries.clone()),
        None => Vec::new(),
    }
}

fn dedupe_preserve_order(vals: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(vals.len());
    let mut out = Vec::with_capacity(vals.len());
    for v in vals {
        let v = v.trim().to_string();
        if v.is_empty() || !seen.insert(v.clone()) {
            continue;
        }
        out.push(v);
    }
    out
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorDetail {
    message: String,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Candidate {
    content: CandidateContent,
    grounding_metadata: GroundingMetadata,
    url_context_metadata: UrlContextMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Part {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GroundingMetadata {
    grounding_chunks: Vec<GroundingChunk>,
    web_search_queries: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GroundingChunk {
    web: WebChunk,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebChunk {
    uri: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UrlContextMetadata {
    url_metadata: Vec<UrlMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UrlMetadata {
    retrieved_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StructuredFields {
    linkedin_url: String,
    company: String,
    title: String,
    description: String,
    confidence: String,
}

#[cfg(test)]
#[path = "gemini_tests.rs"]
mod tests;
