//! Fan the enricher out over a batch of emails and shape the outcomes into
//! stable output rows.
use anyhow::{bail, Result};

use crate::enrich::{Enricher, Enrichment};
use crate::pool::{self, Ctx, ItemResult};
use crate::redact;
use crate::rows::Row;

/// Enrich every email and return one row per input, in input order.
///
/// Enrichment failures are recorded in the row's status and error fields
/// and do not fail the run, unless the options ask for fail-fast.
pub fn enrich_rows(
    emails: &[String],
    enricher: &dyn Enricher,
    opts: &pool::Options,
) -> Result<Vec<Row>> {
    let results = pool::process_all(emails, |ctx, email| process_one(ctx, enricher, email), opts)?;
    Ok(emails
        .iter()
        .zip(&results)
        .map(|(email, outcome)| row_for(email, outcome, enricher.model()))
        .collect())
}

/// Like [`enrich_rows`], but hands each row to `on_row` as soon as its email
/// finishes, in completion order. An `on_row` error cancels the run.
pub fn enrich_rows_stream(
    emails: &[String],
    enricher: &dyn Enricher,
    opts: &pool::Options,
    mut on_row: impl FnMut(Row) -> Result<()>,
) -> Result<()> {
    pool::process_all_with_callback(
        emails,
        |ctx, email| process_one(ctx, enricher, email),
        |idx, outcome| on_row(row_for(&emails[idx], outcome, enricher.model())),
        opts,
    )?;
    Ok(())
}

fn process_one(ctx: &Ctx, enricher: &dyn Enricher, raw: &str) -> Result<Enrichment> {
    let email = raw.trim();
    if email.is_empty() {
        bail!("empty email");
    }
    enricher.enrich(ctx, email)
}

fn row_for(raw_email: &str, outcome: &ItemResult<Enrichment>, model: &str) -> Row {
    let email = raw_email.trim().to_string();
    match outcome {
        Ok(out) => Row {
            email,
            linkedin_url: out.linkedin_url.clone(),
            company: out.company.clone(),
            title: out.title.clone(),
            description: out.description.clone(),
            confidence: out.confidence.clone(),
            status: "ok".to_string(),
            error: String::new(),
            model: out.model.clone(),
            sources: json_array_or_empty(&out.sources),
            web_search_queries: json_array_or_empty(&out.web_search_queries),
        },
        // Failed rows still name the model that was asked, so reruns and
        // audits can tell configurations apart.
        Err(err) => Row {
            email,
            status: "error".to_string(),
            error: redact::secrets(&format!("{err:#}")),
            model: model.to_string(),
            ..Row::default()
        },
    }
}

fn json_array_or_empty(vals: &[String]) -> String {
    if vals.is_empty() {
        return String::new();
    }
    // Serializing a string slice cannot fail; keep the output stable anyway.
    serde_json::to_string(vals).unwrap_or_default()
}

#[cfg(test)]
#[path = "enrich_tests.rs"]
mod tests;
