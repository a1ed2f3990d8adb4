use serde_json::json;

use super::*;

fn emails(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn ok_row(email: &str, company: &str) -> Row {
    Row {
        email: email.to_string(),
        company: company.to_string(),
        status: "ok".to_string(),
        ..Row::default()
    }
}

#[test]
fn cached_ok_rows_are_reused_with_the_current_email() {
    let mut cache = HashMap::new();
    cache.insert("alice@example.com".to_string(), ok_row(" alice@example.com ", "Example"));

    let plan = build_incremental_plan(&emails(&["  alice@example.com  ", "bob@example.com"]), &cache);
    assert_eq!(plan.cached_rows, 1);
    assert_eq!(plan.pending_rows, 1);
    assert_eq!(plan.pending_emails, vec!["bob@example.com"]);
    // The reused row carries the trimmed input email, not the cached one.
    assert_eq!(plan.rows[0].email, "alice@example.com");
    assert_eq!(plan.rows[0].company, "Example");
}

#[test]
fn prior_failures_are_enriched_again() {
    let mut cache = HashMap::new();
    cache.insert(
        "bad@example.com".to_string(),
        Row {
            email: "bad@example.com".to_string(),
            status: "error".to_string(),
            error: "upstream 500".to_string(),
            ..Row::default()
        },
    );

    let plan = build_incremental_plan(&emails(&["bad@example.com"]), &cache);
    assert_eq!(plan.cached_rows, 0);
    assert_eq!(plan.pending_emails, vec!["bad@example.com"]);
}

#[test]
fn duplicate_emails_are_enriched_once_and_filled_everywhere() {
    let input = emails(&["a@x.com", "a@x.com", "b@x.com", " a@x.com "]);
    let mut plan = build_incremental_plan(&input, &HashMap::new());
    assert_eq!(plan.pending_emails, vec!["a@x.com", "b@x.com"]);
    assert_eq!(plan.pending_rows, 4);

    plan.apply_enriched_rows(vec![ok_row("a@x.com", "A Corp"), ok_row("b@x.com", "B Corp")])
        .unwrap();
    assert_eq!(plan.rows.len(), 4);
    assert_eq!(plan.rows[0].company, "A Corp");
    assert_eq!(plan.rows[1].company, "A Corp");
    assert_eq!(plan.rows[2].company, "B Corp");
    assert_eq!(plan.rows[3].company, "A Corp");
    assert_eq!(plan.rows[3].email, "a@x.com");
}

#[test]
fn applying_the_wrong_row_count_fails() {
    let mut plan = build_incremental_plan(&emails(&["a@x.com", "b@x.com"]), &HashMap::new());
    let err = plan.apply_enriched_rows(vec![ok_row("a@x.com", "")]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "incremental enrichment mismatch: got 1 rows for 2 pending emails"
    );
}

#[test]
fn applying_without_tracked_indexes_fails() {
    let mut plan = IncrementalPlan {
        rows: vec![Row::default()],
        pending_emails: vec!["a@x.com".to_string()],
        ..IncrementalPlan::default()
    };
    let err = plan.apply_enriched_rows(vec![ok_row("a@x.com", "")]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "incremental enrichment mismatch: missing pending indexes for \"a@x.com\""
    );
}

#[test]
fn stream_records_become_rows_keyed_by_trimmed_email() {
    let records = vec![
        json!({"email": " a@x.com ", "company": "A Corp", "status": "ok"}),
        json!({"record": {"email": "b@x.com", "company": "B Corp", "status": "ok", "error": null}}),
        json!({"email": "", "company": "ignored"}),
        json!({"no_email": true}),
    ];
    let records: Vec<_> = records
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

    let cache = rows_from_records(&records);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache["a@x.com"].company, "A Corp");
    // Wrapped entries are unwrapped, and null fields read as empty.
    assert_eq!(cache["b@x.com"].company, "B Corp");
    assert_eq!(cache["b@x.com"].error, "");
}

#[test]
fn later_stream_records_override_earlier_ones() {
    let records: Vec<_> = [
        json!({"email": "a@x.com", "status": "error", "error": "boom"}),
        json!({"email": "a@x.com", "status": "ok", "company": "A Corp"}),
    ]
    .into_iter()
    .map(|v| v.as_object().cloned().unwrap())
    .collect();

    let cache = rows_from_records(&records);
    assert_eq!(cache["a@x.com"].status, "ok");
    assert_eq!(cache["a@x.com"].company, "A Corp");
}
