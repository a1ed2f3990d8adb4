//! In-memory stand-ins for the platform and the enricher, used by the
//! orchestration tests.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use ureq::http::StatusCode;

use super::platform::Platform;
use crate::enrich::{Enricher, Enrichment};
use crate::foundry::{ApiError, DatasetRef};
use crate::pool::Ctx;

pub(crate) const INPUT_RID: &str = "ri.foundry.main.dataset.input";
pub(crate) const OUTPUT_RID: &str = "ri.foundry.main.dataset.output";

pub(crate) fn input_ref() -> DatasetRef {
    DatasetRef {
        rid: INPUT_RID.to_string(),
        branch: "master".to_string(),
    }
}

pub(crate) fn output_ref() -> DatasetRef {
    DatasetRef {
        rid: OUTPUT_RID.to_string(),
        branch: "master".to_string(),
    }
}

pub(crate) fn aliases() -> HashMap<String, DatasetRef> {
    let mut out = HashMap::new();
    out.insert("input".to_string(), input_ref());
    out.insert("output".to_string(), output_ref());
    out
}

/// Builds an input dataset CSV with a single `email` column.
pub(crate) fn input_csv(emails: &[&str]) -> Vec<u8> {
    let mut out = String::from("email\n");
    for email in emails {
        out.push_str(email);
        out.push('\n');
    }
    out.into_bytes()
}

#[derive(Default)]
pub(crate) struct FakePlatform {
    pub input_csv: Vec<u8>,
    /// Prior output snapshot; `None` answers 404 like a never-written dataset.
    pub snapshot: Mutex<Option<Vec<u8>>>,
    /// What the stream probe answers.
    pub stream_exists: bool,
    /// When set, the stream record read fails with this HTTP status.
    pub stream_read_status: Option<u16>,
    pub stream_records: Mutex<Vec<Map<String, Value>>>,
    /// When true, creating a transaction answers the open-transaction 409.
    pub open_txn_conflict: bool,
    /// What the open-transaction lookup returns.
    pub open_txn: Option<String>,
    pub calls: Mutex<Vec<String>>,
    /// Uploaded files as (transaction id, path, bytes).
    pub uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub commits: Mutex<Vec<String>>,
    pub txn_counter: AtomicUsize,
}

impl FakePlatform {
    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    pub(crate) fn call_count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(op)).count()
    }

    fn api_error(op: &'static str, status: u16, body: &str) -> anyhow::Error {
        let status = StatusCode::from_u16(status).unwrap();
        anyhow::Error::new(ApiError::new(op, status, body))
    }
}

impl Platform for FakePlatform {
    fn read_table_csv(&self, dataset: &DatasetRef) -> Result<Vec<u8>> {
        self.record(format!("readTable {}", dataset.rid));
        if dataset.rid == INPUT_RID {
            return Ok(self.input_csv.clone());
        }
        match self.snapshot.lock().clone() {
            Some(bytes) => Ok(bytes),
            None => Err(Self::api_error("readTable", 404, "")),
        }
    }

    fn probe_stream(&self, dataset: &DatasetRef) -> Result<bool> {
        self.record(format!("probeStream {}", dataset.rid));
        Ok(self.stream_exists)
    }

    fn read_stream_records(&self, dataset: &DatasetRef) -> Result<Vec<Map<String, Value>>> {
        self.record(format!("readStreamRecords {}", dataset.rid));
        if let Some(status) = self.stream_read_status {
            return Err(Self::api_error("readStreamRecords", status, ""));
        }
        Ok(self.stream_records.lock().clone())
    }

    fn publish_record(&self, dataset: &DatasetRef, record: &Value) -> Result<()> {
        self.record(format!("publishRecord {}", dataset.rid));
        let Some(obj) = record.as_object() else {
            return Err(anyhow!("record must be a json object"));
        };
        self.stream_records.lock().push(obj.clone());
        Ok(())
    }

    fn create_transaction(&self, dataset: &DatasetRef) -> Result<String> {
        self.record(format!("createTransaction {}", dataset.rid));
        if self.open_txn_conflict {
            return Err(Self::api_error(
                "createTransaction",
                409,
                r#"{"errorName":"OpenTransactionAlreadyExists"}"#,
            ));
        }
        let n = self.txn_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ri.txn.{n}"))
    }

    fn find_latest_open_transaction(&self, dataset: &DatasetRef) -> Result<Option<String>> {
        self.record(format!("listTransactions {}", dataset.rid));
        Ok(self.open_txn.clone())
    }

    fn upload_file(
        &self,
        dataset: &DatasetRef,
        txn_id: &str,
        file_path: &str,
        _content_type: &str,
        bytes: &[u8],
    ) -> Result<()> {
        self.record(format!("uploadFile {}", dataset.rid));
        self.uploads
            .lock()
            .push((txn_id.to_string(), file_path.to_string(), bytes.to_vec()));
        Ok(())
    }

    fn commit_transaction(&self, dataset: &DatasetRef, txn_id: &str) -> Result<()> {
        self.record(format!("commitTransaction {}", dataset.rid));
        self.commits.lock().push(txn_id.to_string());
        Ok(())
    }
}

/// Counts calls and resolves the company from the email's domain; addresses
/// in the `error.test` domain fail.
#[derive(Default)]
pub(crate) struct CountingEnricher {
    pub calls: AtomicUsize,
}

impl Enricher for CountingEnricher {
    fn enrich(&self, _ctx: &Ctx, email: &str) -> Result<Enrichment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let domain = email.split_once('@').map(|(_, d)| d).unwrap_or_default();
        if domain == "error.test" {
            bail!("forced error for {email}");
        }
        Ok(Enrichment {
            company: domain.to_string(),
            confidence: "high".to_string(),
            model: "stub-model".to_string(),
            ..Enrichment::default()
        })
    }

    fn model(&self) -> &str {
        "stub-model"
    }
}
