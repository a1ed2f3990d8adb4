//! Incremental planning: reuse prior successful rows and enrich only the
//! emails that still need it.
use std::collections::HashMap;

use anyhow::{bail, Result};
use serde_json::{Map, Value};

use crate::rows::Row;

/// The per-run reuse plan. `rows` has one slot per input email, filled
/// either from the prior output or, after [`apply_enriched_rows`], from
/// fresh enrichment of the deduplicated `pending_emails`.
///
/// [`apply_enriched_rows`]: IncrementalPlan::apply_enriched_rows
#[derive(Debug, Default)]
pub struct IncrementalPlan {
    pub rows: Vec<Row>,
    pub pending_emails: Vec<String>,
    pending_idx: HashMap<String, Vec<usize>>,
    pub cached_rows: usize,
    pub pending_rows: usize,
}

/// Build the plan for one run. `existing_by_email` is keyed by trimmed
/// email; only rows whose status is `ok` are reused, so prior failures are
/// retried on the next run.
pub fn build_incremental_plan(
    input_emails: &[String],
    existing_by_email: &HashMap<String, Row>,
) -> IncrementalPlan {
    let mut plan = IncrementalPlan {
        rows: vec![Row::default(); input_emails.len()],
        ..IncrementalPlan::default()
    };
    for (i, raw) in input_emails.iter().enumerate() {
        let email = raw.trim();

        if let Some(prev) = existing_by_email.get(email) {
            if prev.status.trim().eq_ignore_ascii_case("ok") {
                let mut row = prev.clone();
                row.email = email.to_string();
                plan.rows[i] = row;
                plan.cached_rows += 1;
                continue;
            }
        }

        let indexes = plan.pending_idx.entry(email.to_string()).or_default();
        if indexes.is_empty() {
            plan.pending_emails.push(email.to_string());
        }
        indexes.push(i);
        plan.pending_rows += 1;
    }
    plan
}

impl IncrementalPlan {
    /// Fill every input position waiting on a pending email with its fresh
    /// row. `fresh` must be indexed like `pending_emails`.
    pub fn apply_enriched_rows(&mut self, fresh: Vec<Row>) -> Result<()> {
        if fresh.len() != self.pending_emails.len() {
            bail!(
                "incremental enrichment mismatch: got {} rows for {} pending emails",
                fresh.len(),
                self.pending_emails.len()
            );
        }
        for (mut row, email) in fresh.into_iter().zip(&self.pending_emails) {
            let Some(indexes) = self.pending_idx.get(email).filter(|v| !v.is_empty()) else {
                bail!("incremental enrichment mismatch: missing pending indexes for {email:?}");
            };
            row.email = email.trim().to_string();
            for &idx in indexes {
                self.rows[idx] = row.clone();
            }
        }
        Ok(())
    }
}

/// Convert published stream records into a cache keyed by trimmed email.
///
/// Stream-proxy entries sometimes arrive wrapped in a per-entry `record`
/// envelope; unwrap it before reading fields. Streams are append-only, so
/// a later record for the same email wins.
pub fn rows_from_records(records: &[Map<String, Value>]) -> HashMap<String, Row> {
    let mut out = HashMap::new();
    for rec in records {
        let rec = match rec.get("record").and_then(Value::as_object) {
            Some(inner) => inner,
            None => rec,
        };
        let row = Row {
            email: string_field(rec, "email"),
            linkedin_url: string_field(rec, "linkedin_url"),
            company: string_field(rec, "company"),
            title: string_field(rec, "title"),
            description: string_field(rec, "description"),
            confidence: string_field(rec, "confidence"),
            status: string_field(rec, "status"),
            error: string_field(rec, "error"),
            model: string_field(rec, "model"),
            sources: string_field(rec, "sources"),
            web_search_queries: string_field(rec, "web_search_queries"),
        };
        let key = row.email.trim().to_string();
        if key.is_empty() {
            continue;
        }
        out.insert(key, row);
    }
    out
}

fn string_field(rec: &Map<String, Value>, key: &str) -> String {
    match rec.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
