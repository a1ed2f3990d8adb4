//! Output sinks: the snapshot-table write protocol and the stream publish
//! path, plus the incremental caches each one reads first.
use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::plan;
use super::platform::Platform;
use crate::foundry::{is_forbidden, is_not_found, is_open_transaction_conflict, DatasetRef};
use crate::redact;
use crate::rows::{self, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Dataset,
    Stream,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Dataset => f.write_str("dataset"),
            OutputMode::Stream => f.write_str("stream"),
        }
    }
}

/// Decide where output goes. Explicit modes are taken at face value; `auto`
/// probes the stream endpoint and falls back to a dataset when the probe
/// says the destination is not a stream.
pub fn resolve_output_mode(
    platform: &dyn Platform,
    output: &DatasetRef,
    requested: &str,
) -> Result<OutputMode> {
    let mode = requested.trim().to_ascii_lowercase();
    match mode.as_str() {
        "" | "auto" => {
            if platform.probe_stream(output)? {
                Ok(OutputMode::Stream)
            } else {
                Ok(OutputMode::Dataset)
            }
        }
        "stream" => Ok(OutputMode::Stream),
        "dataset" => Ok(OutputMode::Dataset),
        _ => bail!("invalid output write mode {requested:?} (expected auto|dataset|stream)"),
    }
}

/// Prior successful rows from the output dataset's last snapshot, keyed by
/// trimmed email. A missing snapshot (first run) yields an empty cache; any
/// other read failure is fatal.
pub fn read_snapshot_cache(
    platform: &dyn Platform,
    output: &DatasetRef,
    run: &str,
) -> Result<HashMap<String, Row>> {
    let bytes = match platform.read_table_csv(output) {
        Ok(bytes) => bytes,
        Err(err) if is_not_found(&err) => {
            tracing::info!(
                run,
                rid = %output.rid,
                branch = effective_branch(&output.branch),
                "incremental: no prior output snapshot found"
            );
            return Ok(HashMap::new());
        }
        Err(err) => return Err(err.context("read prior output dataset snapshot")),
    };

    let prior = rows::read_csv(&bytes[..]).context("parse prior output csv")?;
    let mut cache = HashMap::with_capacity(prior.len());
    for row in prior {
        let key = row.email.trim().to_string();
        if key.is_empty() {
            continue;
        }
        cache.insert(key, row);
    }
    tracing::info!(
        run,
        rows = cache.len(),
        rid = %output.rid,
        branch = effective_branch(&output.branch),
        "incremental: loaded prior output rows"
    );
    Ok(cache)
}

/// Prior rows from the records already visible on the output stream.
///
/// Streams are often write-only for the pipeline's token: a forbidden (or
/// missing) read yields an empty cache instead of failing the run, at the
/// cost of re-enriching everything.
pub fn read_stream_cache(
    platform: &dyn Platform,
    output: &DatasetRef,
    run: &str,
) -> Result<HashMap<String, Row>> {
    let records = match platform.read_stream_records(output) {
        Ok(records) => records,
        Err(err) if is_forbidden(&err) || is_not_found(&err) => {
            tracing::info!(
                run,
                rid = %output.rid,
                error = %redact::secrets(&format!("{err:#}")),
                "incremental: stream records unavailable, enriching all input rows"
            );
            return Ok(HashMap::new());
        }
        Err(err) => return Err(err.context("read prior stream records")),
    };

    let cache = plan::rows_from_records(&records);
    tracing::info!(
        run,
        rows = cache.len(),
        rid = %output.rid,
        "incremental: loaded prior stream rows"
    );
    Ok(cache)
}

/// Upload CSV bytes as the dataset's next snapshot.
///
/// Opens a SNAPSHOT transaction, or adopts the latest already-open one when
/// the platform reports a conflict. Only a transaction opened here is
/// committed; an adopted one is left for its owner to close.
pub fn upload_dataset_csv(
    platform: &dyn Platform,
    output: &DatasetRef,
    output_filename: &str,
    csv: &[u8],
) -> Result<()> {
    let mut filename = output_filename.trim();
    if filename.is_empty() {
        filename = "enriched.csv";
    }

    let mut created_txn = true;
    let txn_id = match platform.create_transaction(output) {
        Ok(id) => id,
        Err(err) if is_open_transaction_conflict(&err) => {
            created_txn = false;
            match platform.find_latest_open_transaction(output)? {
                Some(id) if !id.trim().is_empty() => id,
                _ => bail!(
                    "output dataset has an open transaction but no OPEN transaction \
                     was returned by listTransactions (preview endpoint)"
                ),
            }
        }
        Err(err) => return Err(err),
    };

    platform.upload_file(output, &txn_id, filename, "application/octet-stream", csv)?;
    if created_txn {
        platform.commit_transaction(output, &txn_id)?;
    }
    Ok(())
}

/// Build the stream record for one row. Empty values become JSON null so
/// nullable stream columns read as missing rather than "", and every record
/// carries the run id and a nanosecond write timestamp for traceability.
pub fn row_to_stream_record(row: &Row, run_id: &str) -> Value {
    let mut rec = Map::new();
    rec.insert("email".to_string(), Value::String(row.email.clone()));
    assign_nullable(&mut rec, "linkedin_url", &row.linkedin_url);
    assign_nullable(&mut rec, "company", &row.company);
    assign_nullable(&mut rec, "title", &row.title);
    assign_nullable(&mut rec, "description", &row.description);
    assign_nullable(&mut rec, "confidence", &row.confidence);
    assign_nullable(&mut rec, "status", &row.status);
    assign_nullable(&mut rec, "error", &row.error);
    assign_nullable(&mut rec, "model", &row.model);
    assign_nullable(&mut rec, "sources", &row.sources);
    assign_nullable(&mut rec, "web_search_queries", &row.web_search_queries);
    rec.insert("run_id".to_string(), Value::String(run_id.to_string()));
    rec.insert(
        "written_at".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)),
    );
    Value::Object(rec)
}

fn assign_nullable(rec: &mut Map<String, Value>, key: &str, value: &str) {
    let entry = if value.trim().is_empty() {
        Value::Null
    } else {
        Value::String(value.to_string())
    };
    rec.insert(key.to_string(), entry);
}

pub(crate) fn effective_branch(branch: &str) -> &str {
    let branch = branch.trim();
    if branch.is_empty() {
        "master"
    } else {
        branch
    }
}

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;
