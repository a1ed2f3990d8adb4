//! Sanitized errors for non-2xx platform API responses.
use std::fmt;

use serde::Deserialize;

use crate::redact;

/// Summary of a non-2xx platform response.
///
/// Raw response bodies never land in here: either the standard error
/// envelope fields are extracted, or a short redacted snippet is kept as a
/// hint for non-envelope responses.
#[derive(Debug, Default)]
pub struct ApiError {
    pub op: &'static str,
    pub status: u16,
    pub status_text: String,
    pub error_name: String,
    pub error_code: String,
    pub error_instance_id: String,
    pub snippet: String,
}

/// The standard error envelope shape used by platform APIs. Additional
/// fields in real responses are intentionally ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ErrorEnvelope {
    error_code: String,
    error_name: String,
    error_instance_id: String,
}

impl ApiError {
    pub(crate) fn new(op: &'static str, status: ureq::http::StatusCode, body: &str) -> Self {
        let status_text = match status.canonical_reason() {
            Some(reason) => format!("{} {reason}", status.as_u16()),
            None => status.as_u16().to_string(),
        };
        let mut err = ApiError {
            op,
            status: status.as_u16(),
            status_text,
            ..ApiError::default()
        };

        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
            err.error_name = envelope.error_name.trim().to_string();
            err.error_code = envelope.error_code.trim().to_string();
            err.error_instance_id = envelope.error_instance_id.trim().to_string();
            if !err.error_name.is_empty()
                || !err.error_code.is_empty()
                || !err.error_instance_id.is_empty()
            {
                return err;
            }
        }

        err.snippet = redact_and_truncate(body);
        err
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "foundry api error: op={} status={}",
            self.op, self.status_text
        )?;
        if !self.error_name.is_empty() {
            write!(f, " errorName={}", self.error_name)?;
        }
        if !self.error_code.is_empty() {
            write!(f, " errorCode={}", self.error_code)?;
        }
        if !self.error_instance_id.is_empty() {
            write!(f, " instance={}", self.error_instance_id)?;
        }
        if !self.snippet.is_empty() {
            write!(f, " body={}", self.snippet)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// The [`ApiError`] in `err`'s chain, if any.
pub fn find_api_error(err: &anyhow::Error) -> Option<&ApiError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ApiError>())
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    find_api_error(err).is_some_and(|e| e.status == 404)
}

pub fn is_forbidden(err: &anyhow::Error) -> bool {
    find_api_error(err).is_some_and(|e| e.status == 403)
}

/// True for the conflict response meaning an open transaction already
/// exists on the destination dataset.
pub fn is_open_transaction_conflict(err: &anyhow::Error) -> bool {
    find_api_error(err).is_some_and(|e| {
        e.status == 409 && (e.error_name == "OpenTransactionAlreadyExists" || e.error_code == "CONFLICT")
    })
}

fn redact_and_truncate(body: &str) -> String {
    if body.is_empty() {
        return String::new();
    }
    // Keep this small: response bodies can contain sensitive data.
    const MAX: usize = 256;
    let mut cut = body;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        cut = &body[..end];
    }
    let s = redact::secrets(cut).replace(['\n', '\r'], " ");
    let s = s.trim();
    if s.is_empty() {
        return String::new();
    }
    if body.len() > MAX {
        format!("{s}...")
    } else {
        s.to_string()
    }
}
