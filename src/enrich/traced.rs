//! Per-attempt request/response logging around an enricher.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::json;

use super::{Enricher, Enrichment};
use crate::pool::{self, Ctx};
use crate::redact;

/// Wraps an enricher with structured logs carrying the run id, per-email
/// attempt number, and retry classification for every call.
pub struct TracedEnricher<'a> {
    next: &'a dyn Enricher,
    run_id: String,
    max_retries: usize,
    request_timeout: Duration,
    attempts: Mutex<HashMap<String, usize>>,
}

impl<'a> TracedEnricher<'a> {
    pub fn new(
        next: &'a dyn Enricher,
        run_id: &str,
        max_retries: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            next,
            run_id: run_id.to_string(),
            max_retries,
            request_timeout,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn next_attempt(&self, email: &str) -> usize {
        let mut attempts = self.attempts.lock();
        let n = attempts.entry(email.to_string()).or_insert(0);
        *n += 1;
        *n
    }
}

impl Enricher for TracedEnricher<'_> {
    fn enrich(&self, ctx: &Ctx, email: &str) -> Result<Enrichment> {
        let email = email.trim();
        let attempt = self.next_attempt(email);
        let deadline_in = match ctx.remaining() {
            Some(d) => format!("{:?}", Duration::from_millis(d.as_millis() as u64)),
            None => "none".to_string(),
        };
        tracing::info!(
            run = %self.run_id,
            email,
            attempt,
            timeout = ?self.request_timeout,
            deadline_in = %deadline_in,
            request = %json!({"email": email}),
            "enrich request"
        );

        let start = Instant::now();
        let result = self.next.enrich(ctx, email);
        let elapsed = start.elapsed();

        match &result {
            Ok(out) => {
                tracing::info!(
                    run = %self.run_id,
                    email,
                    attempt,
                    duration = ?elapsed,
                    status = "ok",
                    response = %response_json(out),
                    "enrich response"
                );
            }
            Err(err) => {
                let budget = pool::max_extra_retries(self.max_retries, err);
                let retryable = pool::is_retryable(err);
                let will_retry = retryable && attempt <= budget;
                tracing::info!(
                    run = %self.run_id,
                    email,
                    attempt,
                    duration = ?elapsed,
                    status = "error",
                    retryable,
                    will_retry,
                    max_extra_retries = budget,
                    error = %redact::secrets(&format!("{err:#}")),
                    "enrich response"
                );
            }
        }
        result
    }

    fn model(&self) -> &str {
        self.next.model()
    }
}

fn response_json(out: &Enrichment) -> String {
    json!({
        "linkedin_url": out.linkedin_url,
        "company": out.company,
        "title": out.title,
        "description": out.description,
        "confidence": out.confidence,
        "model": out.model,
        "sources": out.sources,
        "web_search_queries": out.web_search_queries,
    })
    .to_string()
}
