//! The platform surface the run orchestration talks to, behind a trait so
//! tests can substitute an in-memory fake for the HTTP client.
use anyhow::Result;
use serde_json::{Map, Value};

use crate::foundry::{retry_transient, DatasetRef, FoundryClient};

/// Dataset and stream operations needed by one run. Implementations own
/// transient-failure retry; callers see only final outcomes.
pub(crate) trait Platform {
    fn read_table_csv(&self, dataset: &DatasetRef) -> Result<Vec<u8>>;
    fn probe_stream(&self, dataset: &DatasetRef) -> Result<bool>;
    fn read_stream_records(&self, dataset: &DatasetRef) -> Result<Vec<Map<String, Value>>>;
    fn publish_record(&self, dataset: &DatasetRef, record: &Value) -> Result<()>;
    fn create_transaction(&self, dataset: &DatasetRef) -> Result<String>;
    fn find_latest_open_transaction(&self, dataset: &DatasetRef) -> Result<Option<String>>;
    fn upload_file(
        &self,
        dataset: &DatasetRef,
        txn_id: &str,
        file_path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<()>;
    fn commit_transaction(&self, dataset: &DatasetRef, txn_id: &str) -> Result<()>;
}

/// The real platform, wrapping every client call in transient retry.
pub struct FoundryPlatform {
    client: FoundryClient,
}

impl FoundryPlatform {
    pub fn new(client: FoundryClient) -> Self {
        Self { client }
    }
}

impl Platform for FoundryPlatform {
    fn read_table_csv(&self, dataset: &DatasetRef) -> Result<Vec<u8>> {
        retry_transient(|| self.client.read_table_csv(&dataset.rid, &dataset.branch))
    }

    fn probe_stream(&self, dataset: &DatasetRef) -> Result<bool> {
        retry_transient(|| self.client.probe_stream(&dataset.rid, &dataset.branch))
    }

    fn read_stream_records(&self, dataset: &DatasetRef) -> Result<Vec<Map<String, Value>>> {
        retry_transient(|| self.client.read_stream_records(&dataset.rid, &dataset.branch))
    }

    fn publish_record(&self, dataset: &DatasetRef, record: &Value) -> Result<()> {
        retry_transient(|| {
            self.client
                .publish_stream_json_record(&dataset.rid, &dataset.branch, record)
        })
    }

    fn create_transaction(&self, dataset: &DatasetRef) -> Result<String> {
        retry_transient(|| self.client.create_transaction(&dataset.rid, &dataset.branch))
    }

    fn find_latest_open_transaction(&self, dataset: &DatasetRef) -> Result<Option<String>> {
        retry_transient(|| self.client.find_latest_open_transaction(&dataset.rid))
    }

    fn upload_file(
        &self,
        dataset: &DatasetRef,
        txn_id: &str,
        file_path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<()> {
        retry_transient(|| {
            self.client
                .upload_file(&dataset.rid, txn_id, file_path, content_type, bytes)
        })
    }

    fn commit_transaction(&self, dataset: &DatasetRef, txn_id: &str) -> Result<()> {
        retry_transient(|| self.client.commit_transaction(&dataset.rid, txn_id))
    }
}
