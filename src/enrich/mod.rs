//! The enrichment contract and its implementations: the Gemini-backed
//! enricher and a logging decorator used by platform runs.
use anyhow::Result;

use crate::pool::Ctx;

mod gemini;
mod traced;

pub use gemini::{GeminiConfig, GeminiEnricher};
pub use traced::TracedEnricher;

/// Structured enrichment output for a single email. Everything is a string
/// so the CSV snapshot and stream record stay simple and stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub linkedin_url: String,
    pub company: String,
    pub title: String,
    pub description: String,
    pub confidence: String,
    pub model: String,
    pub sources: Vec<String>,
    pub web_search_queries: Vec<String>,
}

/// Enriches a single email address.
///
/// Implementations are invoked exactly once per attempt; retry and backoff
/// belong to the worker pool, not the enricher. Transient upstream failures
/// must come back tagged with [`crate::pool::Retry`] so the pool knows to
/// retry them.
pub trait Enricher: Sync {
    fn enrich(&self, ctx: &Ctx, email: &str) -> Result<Enrichment>;

    /// The model name recorded on every output row, failed ones included.
    fn model(&self) -> &str;
}
