//! Minimal HTTP client for the platform's dataset and stream-proxy APIs.
//!
//! Covers exactly the surface the pipeline needs: branch lookups, snapshot
//! reads via `readTable`, stream probe/read/publish, and the transaction
//! endpoints used to upload a snapshot CSV.
use std::fs;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use ureq::tls::{Certificate, RootCerts, TlsConfig};

use super::error::ApiError;

pub struct FoundryClient {
    agent: ureq::Agent,
    api_base: String,
    stream_base: String,
    auth: String,
}

/// One dataset transaction as returned by the (preview) list endpoint.
/// The payload carries more fields (type, timestamps); only the two the
/// pipeline inspects are kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Transaction {
    pub rid: String,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BranchResponse {
    transaction_rid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ListTransactionsResponse {
    data: Vec<Transaction>,
    next_page_token: String,
}

impl FoundryClient {
    /// Build a client for the given service base URLs.
    ///
    /// `api_gateway_url` looks like `https://<stack>.../api`,
    /// `stream_proxy_url` like `https://<stack>.../stream-proxy/api`.
    /// `default_ca_path` is optional and, when set, replaces the TLS trust
    /// store with the PEM bundle at that path.
    pub fn new(
        api_gateway_url: &str,
        stream_proxy_url: &str,
        token: &str,
        default_ca_path: &str,
    ) -> Result<Self> {
        let api_base = parse_base_url(api_gateway_url, "api gateway")?;
        let stream_base = parse_base_url(stream_proxy_url, "stream-proxy")?;
        let agent = new_agent(default_ca_path)?;
        Ok(Self {
            agent,
            api_base,
            stream_base,
            auth: format!("Bearer {}", token.trim()),
        })
    }

    /// The transaction RID a branch currently points at, or "" when the
    /// branch has no transaction yet.
    pub fn branch_transaction_rid(&self, dataset_rid: &str, branch: &str) -> Result<String> {
        let dataset_rid = dataset_rid.trim();
        if dataset_rid.is_empty() {
            bail!("dataset rid is required");
        }
        let branch = default_branch(branch);

        let url = format!(
            "{}/v2/datasets/{}/branches/{}",
            self.api_base,
            escape_path_segment(dataset_rid),
            escape_path_segment(branch),
        );
        let mut resp = self
            .agent
            .get(&url)
            .header("Authorization", self.auth.as_str())
            .header("Accept", "application/json")
            .call()?;
        let body = resp.body_mut().read_to_string()?;
        if !resp.status().is_success() {
            return Err(ApiError::new("getBranch", resp.status(), &body).into());
        }

        let out: BranchResponse =
            serde_json::from_str(&body).context("parse get branch response")?;
        Ok(out.transaction_rid.trim().to_string())
    }

    /// Read the dataset's current snapshot as CSV bytes.
    ///
    /// The read is pinned to the branch's latest transaction; some stacks
    /// reject `readTable` without explicit start/end transaction RIDs.
    pub fn read_table_csv(&self, dataset_rid: &str, branch: &str) -> Result<Vec<u8>> {
        let branch = default_branch(branch);
        let txn_rid = self.branch_transaction_rid(dataset_rid, branch)?;

        let mut query = format!("branchName={}", escape_query_value(branch));
        if !txn_rid.is_empty() {
            query.push_str(&format!(
                "&endTransactionRid={}&format=CSV&startTransactionRid={}",
                escape_query_value(&txn_rid),
                escape_query_value(&txn_rid),
            ));
        } else {
            query.push_str("&format=CSV");
        }
        let url = format!(
            "{}/v2/datasets/{}/readTable?{}",
            self.api_base,
            escape_path_segment(dataset_rid.trim()),
            query,
        );

        let mut resp = self
            .agent
            .get(&url)
            .header("Authorization", self.auth.as_str())
            .header("Accept", "text/csv")
            .call()?;
        let body = resp.body_mut().read_to_vec()?;
        if !resp.status().is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(ApiError::new("readTable", resp.status(), &text).into());
        }
        Ok(body)
    }

    /// Whether the RID is reachable as a stream via stream-proxy.
    ///
    /// 2xx means yes, 404 means no; any other status is an error.
    pub fn probe_stream(&self, stream_rid: &str, branch: &str) -> Result<bool> {
        let stream_rid = stream_rid.trim();
        if stream_rid.is_empty() {
            bail!("stream rid is required");
        }
        let url = self.stream_records_url(stream_rid, default_branch(branch));
        let mut resp = self
            .agent
            .get(&url)
            .header("Authorization", self.auth.as_str())
            .header("Accept", "application/json")
            .call()?;
        let body = resp.body_mut().read_to_string()?;
        if resp.status().as_u16() == 404 {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(ApiError::new("probeStream", resp.status(), &body).into());
        }
        Ok(true)
    }

    /// Read the full record list for a stream branch. Streams can be large
    /// in real deployments; callers treat this as best-effort.
    pub fn read_stream_records(
        &self,
        stream_rid: &str,
        branch: &str,
    ) -> Result<Vec<Map<String, Value>>> {
        let stream_rid = stream_rid.trim();
        if stream_rid.is_empty() {
            bail!("stream rid is required");
        }
        let url = self.stream_records_url(stream_rid, default_branch(branch));
        let mut resp = self
            .agent
            .get(&url)
            .header("Authorization", self.auth.as_str())
            .header("Accept", "application/json")
            .call()?;
        let body = resp.body_mut().read_to_string()?;
        if !resp.status().is_success() {
            return Err(ApiError::new("readStreamRecords", resp.status(), &body).into());
        }

        let top: Value = serde_json::from_str(&body).context("parse stream records response")?;
        extract_record_list(&top).context("parse stream records response")
    }

    /// Publish one JSON object to a stream branch.
    pub fn publish_stream_json_record(
        &self,
        stream_rid: &str,
        branch: &str,
        record: &Value,
    ) -> Result<()> {
        let stream_rid = stream_rid.trim();
        if stream_rid.is_empty() {
            bail!("stream rid is required");
        }
        let url = format!(
            "{}/streams/{}/branches/{}/jsonRecord",
            self.stream_base,
            escape_path_segment(stream_rid),
            escape_path_segment(default_branch(branch)),
        );
        let mut resp = self
            .agent
            .post(&url)
            .header("Authorization", self.auth.as_str())
            .header("Accept", "application/json")
            .send_json(record)?;
        let body = resp.body_mut().read_to_string()?;
        if !resp.status().is_success() {
            return Err(ApiError::new("publishStreamJSONRecord", resp.status(), &body).into());
        }
        Ok(())
    }

    /// Open a SNAPSHOT transaction and return its RID.
    pub fn create_transaction(&self, dataset_rid: &str, branch: &str) -> Result<String> {
        let mut url = format!(
            "{}/v2/datasets/{}/transactions",
            self.api_base,
            escape_path_segment(dataset_rid.trim()),
        );
        if !branch.trim().is_empty() {
            url.push_str(&format!("?branchName={}", escape_query_value(branch.trim())));
        }
        let mut resp = self
            .agent
            .post(&url)
            .header("Authorization", self.auth.as_str())
            .header("Accept", "application/json")
            .send_json(json!({"transactionType": "SNAPSHOT"}))?;
        let body = resp.body_mut().read_to_string()?;
        if !resp.status().is_success() {
            return Err(ApiError::new("createTransaction", resp.status(), &body).into());
        }
        transaction_id_from_response(&body)
    }

    /// List dataset transactions, newest first. Returns the page plus the
    /// next page token ("" when exhausted).
    pub fn list_transactions(
        &self,
        dataset_rid: &str,
        page_size: usize,
        page_token: &str,
    ) -> Result<(Vec<Transaction>, String)> {
        // preview=true is required by the platform for this endpoint.
        let mut query = String::new();
        if page_size > 0 {
            query.push_str(&format!("pageSize={page_size}&"));
        }
        if !page_token.trim().is_empty() {
            query.push_str(&format!("pageToken={}&", escape_query_value(page_token.trim())));
        }
        query.push_str("preview=true");

        let url = format!(
            "{}/v2/datasets/{}/transactions?{}",
            self.api_base,
            escape_path_segment(dataset_rid.trim()),
            query,
        );
        let mut resp = self
            .agent
            .get(&url)
            .header("Authorization", self.auth.as_str())
            .header("Accept", "application/json")
            .call()?;
        let body = resp.body_mut().read_to_string()?;
        if !resp.status().is_success() {
            return Err(ApiError::new("listTransactions", resp.status(), &body).into());
        }

        let out: ListTransactionsResponse =
            serde_json::from_str(&body).context("parse list transactions response")?;
        Ok((out.data, out.next_page_token.trim().to_string()))
    }

    /// The RID of the most recent OPEN transaction, if one exists within the
    /// first few pages. Transactions list newest first, so the first OPEN
    /// entry is the latest.
    pub fn find_latest_open_transaction(&self, dataset_rid: &str) -> Result<Option<String>> {
        let mut page_token = String::new();
        for _ in 0..5 {
            let (txns, next) = self.list_transactions(dataset_rid, 100, &page_token)?;
            for txn in &txns {
                let rid = txn.rid.trim();
                if txn.status.trim().eq_ignore_ascii_case("OPEN") && !rid.is_empty() {
                    return Ok(Some(rid.to_string()));
                }
            }
            if next.is_empty() {
                break;
            }
            page_token = next;
        }
        Ok(None)
    }

    /// Upload file bytes into an open transaction.
    pub fn upload_file(
        &self,
        dataset_rid: &str,
        txn_id: &str,
        file_path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let mut url = format!(
            "{}/v2/datasets/{}/files/{}/upload",
            self.api_base,
            escape_path_segment(dataset_rid.trim()),
            escape_url_path(file_path),
        );
        if !txn_id.trim().is_empty() {
            url.push_str(&format!("?transactionRid={}", escape_query_value(txn_id.trim())));
        }
        let mut req = self
            .agent
            .post(&url)
            .header("Authorization", self.auth.as_str());
        if !content_type.is_empty() {
            req = req.header("Content-Type", content_type);
        }
        let mut resp = req.send(bytes)?;
        let body = resp.body_mut().read_to_string()?;
        if !resp.status().is_success() {
            return Err(ApiError::new("uploadFile", resp.status(), &body).into());
        }
        Ok(())
    }

    pub fn commit_transaction(&self, dataset_rid: &str, txn_id: &str) -> Result<()> {
        let url = format!(
            "{}/v2/datasets/{}/transactions/{}/commit",
            self.api_base,
            escape_path_segment(dataset_rid.trim()),
            escape_path_segment(txn_id.trim()),
        );
        let mut resp = self
            .agent
            .post(&url)
            .header("Authorization", self.auth.as_str())
            .header("Accept", "application/json")
            .send_empty()?;
        let body = resp.body_mut().read_to_string()?;
        if !resp.status().is_success() {
            return Err(ApiError::new("commitTransaction", resp.status(), &body).into());
        }
        Ok(())
    }

    fn stream_records_url(&self, stream_rid: &str, branch: &str) -> String {
        format!(
            "{}/streams/{}/branches/{}/records",
            self.stream_base,
            escape_path_segment(stream_rid),
            escape_path_segment(branch),
        )
    }
}

fn new_agent(default_ca_path: &str) -> Result<ureq::Agent> {
    let mut config = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(60)))
        .http_status_as_error(false);

    let ca_path = default_ca_path.trim();
    if !ca_path.is_empty() {
        let pem = fs::read(ca_path).context("read DEFAULT_CA_PATH file")?;
        let certs = parse_pem_bundle(&pem)?;
        if certs.is_empty() {
            bail!("parse DEFAULT_CA_PATH PEM: no certs found");
        }
        let tls = TlsConfig::builder()
            .root_certs(RootCerts::new_with_certs(&certs))
            .build();
        config = config.tls_config(tls);
    }

    Ok(config.build().new_agent())
}

pub(crate) fn parse_pem_bundle(pem: &[u8]) -> Result<Vec<Certificate<'static>>> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";
    let text = String::from_utf8_lossy(pem);
    let mut certs = Vec::new();
    let mut rest = text.as_ref();
    while let Some(start) = rest.find(BEGIN) {
        let Some(end) = rest[start..].find(END) else {
            break;
        };
        let block = &rest[start..start + end + END.len()];
        let cert = Certificate::from_pem(block.as_bytes())
            .context("parse DEFAULT_CA_PATH PEM")?
            .to_owned();
        certs.push(cert);
        rest = &rest[start + end + END.len()..];
    }
    Ok(certs)
}

fn parse_base_url(raw: &str, name: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("{name} base URL is required");
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let host = with_scheme
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    if host.is_empty() || host.starts_with('/') {
        bail!("{name} base URL must include a host (got {raw:?})");
    }
    Ok(with_scheme.trim_end_matches('/').to_string())
}

fn default_branch(branch: &str) -> &str {
    let branch = branch.trim();
    if branch.is_empty() {
        // Alias maps typically omit the branch for the default one.
        "master"
    } else {
        branch
    }
}

fn transaction_id_from_response(body: &str) -> Result<String> {
    #[derive(Debug, Default, Deserialize)]
    #[serde(default, rename_all = "camelCase")]
    struct CreateTxnResponse {
        rid: String,
        // Legacy shape returned by some mock servers.
        transaction_id: String,
    }

    let out: CreateTxnResponse =
        serde_json::from_str(body).context("parse create transaction response")?;
    let mut txn_id = out.transaction_id.trim();
    if txn_id.is_empty() {
        txn_id = out.rid.trim();
    }
    if txn_id.is_empty() {
        bail!("create transaction response missing rid");
    }
    Ok(txn_id.to_string())
}

/// Pull a list of record objects out of the varying response shapes the
/// stream-proxy returns: a bare array, a wrapper object with a well-known
/// paging key, or (as a last resort) any field holding an array of objects.
fn extract_record_list(v: &Value) -> Result<Vec<Map<String, Value>>> {
    match v {
        Value::Array(items) => Ok(items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect()),
        Value::Object(obj) => {
            for key in ["records", "values", "data", "items", "result"] {
                if let Some(inner) = obj.get(key) {
                    if let Ok(recs) = extract_record_list(inner) {
                        return Ok(recs);
                    }
                }
            }
            for inner in obj.values() {
                if let Value::Array(items) = inner {
                    if items.iter().any(Value::is_object) {
                        return extract_record_list(inner);
                    }
                }
            }
            bail!("unexpected json object shape")
        }
        other => bail!("unexpected json type {}", json_kind(other)),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn escape_path_segment(segment: &str) -> String {
    // RFC 3986 pchar set, minus the separators that must stay escaped
    // inside a single segment.
    const SAFE: &[u8] = b"-._~!$&'()*+=:@";
    let mut out = String::with_capacity(segment.len());
    for &b in segment.as_bytes() {
        if b.is_ascii_alphanumeric() || SAFE.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Escape a relative file path for use inside a URL, preserving `/`
/// separators while escaping each segment.
fn escape_url_path(p: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in p.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            segment => parts.push(segment),
        }
    }
    let escaped: Vec<String> = parts.iter().map(|s| escape_path_segment(s)).collect();
    escaped.join("/")
}

fn escape_query_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for &b in v.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
