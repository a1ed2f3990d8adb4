//! One-shot run entry points: local file-to-file mode and the platform
//! orchestration over datasets and streams.
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use super::enrich::{enrich_rows, enrich_rows_stream};
use super::plan::build_incremental_plan;
use super::platform::Platform;
use super::sink::{self, OutputMode};
use crate::enrich::{Enricher, TracedEnricher};
use crate::foundry::DatasetRef;
use crate::pool::{self, FailurePolicy};
use crate::rows::{self, Row};

/// Enrich a local CSV of emails into a local output CSV.
pub fn run_local(
    input_path: &Path,
    output_path: &Path,
    opts: &pool::Options,
    enricher: &dyn Enricher,
) -> Result<()> {
    let input = File::open(input_path)
        .with_context(|| format!("open {}", input_path.display()))?;
    let emails = rows::read_emails_csv(input)?;

    let out_rows = enrich_rows(&emails, enricher, opts)?;

    let output = File::create(output_path)
        .with_context(|| format!("create {}", output_path.display()))?;
    rows::write_csv(output, &out_rows)
}

/// Aliases and filenames for one platform run, resolved by the CLI.
pub struct FoundryRunParams<'a> {
    pub input_alias: &'a str,
    pub output_alias: &'a str,
    pub output_filename: &'a str,
    pub output_write_mode: &'a str,
}

/// Run the full platform orchestration: read input emails, resolve the
/// output sink, reuse prior successful rows, enrich the rest, and write
/// through the sink's protocol.
pub fn run_foundry(
    platform: &dyn Platform,
    aliases: &HashMap<String, DatasetRef>,
    params: &FoundryRunParams<'_>,
    opts: &pool::Options,
    enricher: &dyn Enricher,
) -> Result<()> {
    let run_id = format!("run-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let run_start = Instant::now();

    let Some(input_ref) = aliases.get(params.input_alias) else {
        bail!("missing alias {:?} in RESOURCE_ALIAS_MAP", params.input_alias);
    };
    let Some(output_ref) = aliases.get(params.output_alias) else {
        bail!("missing alias {:?} in RESOURCE_ALIAS_MAP", params.output_alias);
    };
    let input_at = format!(
        "{}@{}",
        input_ref.rid,
        sink::effective_branch(&input_ref.branch)
    );
    let output_at = format!(
        "{}@{}",
        output_ref.rid,
        sink::effective_branch(&output_ref.branch)
    );
    tracing::info!(
        run = %run_id,
        input = %input_at,
        output = %output_at,
        write_mode = params.output_write_mode,
        workers = opts.workers,
        max_retries = opts.max_retries,
        timeout = ?opts.request_timeout,
        rate_limit_rps = opts.rate_limit_rps,
        fail_fast = opts.failure_policy == FailurePolicy::FailFast,
        "foundry run start"
    );

    let read_start = Instant::now();
    let emails = read_input_emails(platform, input_ref)?;
    tracing::info!(
        run = %run_id,
        emails = emails.len(),
        elapsed = ?read_start.elapsed(),
        "loaded emails from input dataset"
    );

    let mode_start = Instant::now();
    let mode = sink::resolve_output_mode(platform, output_ref, params.output_write_mode)?;
    tracing::info!(
        run = %run_id,
        mode = %mode,
        elapsed = ?mode_start.elapsed(),
        "resolved output mode"
    );

    let enrich_start = Instant::now();
    match mode {
        OutputMode::Stream => {
            let cache = sink::read_stream_cache(platform, output_ref, &run_id)?;
            let plan = build_incremental_plan(&emails, &cache);
            tracing::info!(
                run = %run_id,
                input_rows = emails.len(),
                cached_rows = plan.cached_rows,
                rows_to_enrich = plan.pending_rows,
                unique_emails_to_enrich = plan.pending_emails.len(),
                "incremental plan"
            );

            let write_start = Instant::now();
            tracing::info!(run = %run_id, output = %output_at, "publishing rows to stream-proxy");

            let traced =
                TracedEnricher::new(enricher, &run_id, opts.max_retries, opts.request_timeout);
            let total = plan.pending_emails.len();
            let mut processed = 0usize;
            let mut published = 0usize;
            let mut ok_rows = 0usize;
            let mut error_rows = 0usize;
            enrich_rows_stream(&plan.pending_emails, &traced, opts, |row| {
                processed += 1;
                if is_ok_status(&row.status) {
                    ok_rows += 1;
                } else {
                    error_rows += 1;
                }
                tracing::info!(
                    run = %run_id,
                    email = %row.email,
                    status = %row.status,
                    completed = processed,
                    total,
                    elapsed = ?enrich_start.elapsed(),
                    "stream row enriched"
                );

                let publish_start = Instant::now();
                platform.publish_record(output_ref, &sink::row_to_stream_record(&row, &run_id))?;
                published += 1;
                tracing::info!(
                    run = %run_id,
                    email = %row.email,
                    status = %row.status,
                    publish_elapsed = ?publish_start.elapsed(),
                    published,
                    total,
                    "stream row published"
                );
                Ok(())
            })?;

            tracing::info!(
                run = %run_id,
                produced = processed,
                ok = ok_rows,
                error = error_rows,
                elapsed = ?enrich_start.elapsed(),
                "enrichment complete"
            );
            tracing::info!(
                run = %run_id,
                write_elapsed = ?write_start.elapsed(),
                total_elapsed = ?run_start.elapsed(),
                "foundry run complete: stream publish finished"
            );
            Ok(())
        }
        OutputMode::Dataset => {
            let cache = sink::read_snapshot_cache(platform, output_ref, &run_id)?;
            let mut plan = build_incremental_plan(&emails, &cache);
            tracing::info!(
                run = %run_id,
                input_rows = emails.len(),
                cached_rows = plan.cached_rows,
                rows_to_enrich = plan.pending_rows,
                unique_emails_to_enrich = plan.pending_emails.len(),
                "incremental plan"
            );

            if !plan.pending_emails.is_empty() {
                let traced =
                    TracedEnricher::new(enricher, &run_id, opts.max_retries, opts.request_timeout);
                let fresh = enrich_rows(&plan.pending_emails, &traced, opts)?;
                plan.apply_enriched_rows(fresh)?;
            }
            let out_rows = plan.rows;
            let (ok_rows, error_rows) = count_statuses(&out_rows);
            tracing::info!(
                run = %run_id,
                produced = out_rows.len(),
                ok = ok_rows,
                error = error_rows,
                elapsed = ?enrich_start.elapsed(),
                "enrichment complete"
            );

            let write_start = Instant::now();
            let mut csv = Vec::new();
            rows::write_csv(&mut csv, &out_rows)?;
            sink::upload_dataset_csv(platform, output_ref, params.output_filename, &csv)?;
            tracing::info!(
                run = %run_id,
                write_elapsed = ?write_start.elapsed(),
                total_elapsed = ?run_start.elapsed(),
                "foundry run complete: dataset output finished"
            );
            Ok(())
        }
    }
}

fn read_input_emails(platform: &dyn Platform, input: &DatasetRef) -> Result<Vec<String>> {
    let bytes = platform.read_table_csv(input)?;
    rows::read_emails_csv(&bytes[..])
}

fn is_ok_status(status: &str) -> bool {
    status.trim().eq_ignore_ascii_case("ok")
}

fn count_statuses(out_rows: &[Row]) -> (usize, usize) {
    let mut ok = 0;
    let mut err = 0;
    for row in out_rows {
        if is_ok_status(&row.status) {
            ok += 1;
        } else {
            err += 1;
        }
    }
    (ok, err)
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
