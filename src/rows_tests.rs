use super::*;

fn sample_row() -> Row {
    Row {
        email: "alice@example.com".into(),
        linkedin_url: "https://linkedin.com/in/alice".into(),
        company: "Example Corp".into(),
        title: "CTO".into(),
        description: "Runs engineering".into(),
        confidence: "high".into(),
        status: "ok".into(),
        error: String::new(),
        model: "gemini-2.5-flash".into(),
        sources: r#"["https://example.com"]"#.into(),
        web_search_queries: String::new(),
    }
}

#[test]
fn write_then_read_preserves_rows() {
    let rows = vec![
        sample_row(),
        Row {
            email: "bob@corp.test".into(),
            status: "error".into(),
            error: "no response".into(),
            ..Row::default()
        },
    ];
    let mut buf = Vec::new();
    write_csv(&mut buf, &rows).unwrap();

    let text = String::from_utf8(buf.clone()).unwrap();
    let first_line = text.lines().next().unwrap();
    assert_eq!(first_line, HEADER.join(","));

    let got = read_csv(buf.as_slice()).unwrap();
    assert_eq!(got, rows);
}

#[test]
fn read_csv_ignores_extra_columns_and_column_order() {
    let input = "status,email,extra,error,linkedin_url,company,title,description,confidence,model,sources,web_search_queries\n\
                 ok,alice@example.com,unused,,,Example Corp,,,,,,\n";
    let rows = read_csv(input.as_bytes()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].email, "alice@example.com");
    assert_eq!(rows[0].status, "ok");
    assert_eq!(rows[0].company, "Example Corp");
}

#[test]
fn read_csv_requires_every_contract_column() {
    let input = "email,status\nalice@example.com,ok\n";
    let err = read_csv(input.as_bytes()).unwrap_err();
    assert!(
        err.to_string().contains("missing required column"),
        "{err}"
    );
}

#[test]
fn read_csv_fills_short_records_with_empty_strings() {
    let mut buf = Vec::new();
    write_csv(&mut buf, &[]).unwrap();
    let mut text = String::from_utf8(buf).unwrap();
    text.push_str("carol@new.test,,\n");
    let rows = read_csv(text.as_bytes()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].email, "carol@new.test");
    assert_eq!(rows[0].status, "");
    assert_eq!(rows[0].web_search_queries, "");
}

#[test]
fn read_emails_matches_column_case_insensitively() {
    let input = "id,Email\n1,alice@example.com\n2, bob@corp.test \n";
    let emails = read_emails_csv(input.as_bytes()).unwrap();
    assert_eq!(emails, vec!["alice@example.com", " bob@corp.test "]);
}

#[test]
fn read_emails_requires_the_email_column() {
    let input = "id,name\n1,alice\n";
    let err = read_emails_csv(input.as_bytes()).unwrap_err();
    assert_eq!(err.to_string(), "missing required column \"email\"");
}

#[test]
fn read_emails_rejects_rows_missing_the_email_cell() {
    let input = "id,email\n1\n";
    let err = read_emails_csv(input.as_bytes()).unwrap_err();
    assert_eq!(err.to_string(), "row has 1 columns, want at least 2");
}

#[test]
fn read_emails_keeps_empty_values() {
    let input = "id,email\n1,\n2,alice@example.com\n";
    let emails = read_emails_csv(input.as_bytes()).unwrap();
    assert_eq!(emails, vec!["", "alice@example.com"]);
}
