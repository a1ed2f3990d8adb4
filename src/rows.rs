//! The stable output row contract shared by every sink, plus CSV encoding
//! for the snapshot table format and the email-column input reader.
use std::collections::HashMap;
use std::io;

use anyhow::{bail, Context, Result};

/// Column order for the output table. Readers and writers both key off
/// this list, so reordering it is a breaking schema change.
const HEADER: [&str; 11] = [
    "email",
    "linkedin_url",
    "company",
    "title",
    "description",
    "confidence",
    "status",
    "error",
    "model",
    "sources",
    "web_search_queries",
];

/// One enriched identifier in the stable output schema. Everything is a
/// string so the CSV snapshot and the stream record stay trivially aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub email: String,
    pub linkedin_url: String,
    pub company: String,
    pub title: String,
    pub description: String,
    pub confidence: String,
    pub status: String,
    pub error: String,
    pub model: String,
    pub sources: String,
    pub web_search_queries: String,
}

impl Row {
    fn fields(&self) -> [&str; 11] {
        [
            &self.email,
            &self.linkedin_url,
            &self.company,
            &self.title,
            &self.description,
            &self.confidence,
            &self.status,
            &self.error,
            &self.model,
            &self.sources,
            &self.web_search_queries,
        ]
    }
}

/// Write rows as CSV with the stable [`HEADER`] ordering.
pub fn write_csv<W: io::Write>(w: W, rows: &[Row]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(HEADER).context("write csv header")?;
    for row in rows {
        wtr.write_record(row.fields()).context("write csv row")?;
    }
    wtr.flush().context("flush csv output")?;
    Ok(())
}

/// Read rows from a CSV using the stable [`HEADER`] contract.
///
/// Extra columns are ignored; every contract column must be present. Short
/// records read missing cells as empty strings.
pub fn read_csv<R: io::Read>(r: R) -> Result<Vec<Row>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(r);
    let mut records = rdr.records();

    let header = match records.next() {
        Some(rec) => rec.context("read csv header")?,
        None => bail!("missing csv header"),
    };
    let mut index = HashMap::with_capacity(header.len());
    for (i, name) in header.iter().enumerate() {
        index.insert(name.trim().to_string(), i);
    }
    for name in HEADER {
        if !index.contains_key(name) {
            bail!("missing required column {name:?}");
        }
    }

    let mut rows = Vec::new();
    for rec in records {
        let rec = rec.context("read csv row")?;
        let get = |col: &str| -> String {
            index
                .get(col)
                .and_then(|&i| rec.get(i))
                .unwrap_or("")
                .to_string()
        };
        rows.push(Row {
            email: get("email"),
            linkedin_url: get("linkedin_url"),
            company: get("company"),
            title: get("title"),
            description: get("description"),
            confidence: get("confidence"),
            status: get("status"),
            error: get("error"),
            model: get("model"),
            sources: get("sources"),
            web_search_queries: get("web_search_queries"),
        });
    }
    Ok(rows)
}

/// Read the values of the `email` column (matched case-insensitively) from
/// an arbitrary input CSV. Values come back untrimmed.
pub fn read_emails_csv<R: io::Read>(r: R) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(r);
    let mut records = rdr.records();

    let header = match records.next() {
        Some(rec) => rec.context("read header")?,
        None => bail!("read header: empty input"),
    };
    let email_idx = header
        .iter()
        .position(|col| col.trim().eq_ignore_ascii_case("email"));
    let Some(email_idx) = email_idx else {
        bail!("missing required column \"email\"");
    };

    let mut emails = Vec::new();
    for rec in records {
        let rec = rec.context("read row")?;
        match rec.get(email_idx) {
            Some(v) => emails.push(v.to_string()),
            None => bail!(
                "row has {} columns, want at least {}",
                rec.len(),
                email_idx + 1
            ),
        }
    }
    Ok(emails)
}

#[cfg(test)]
#[path = "rows_tests.rs"]
mod tests;
