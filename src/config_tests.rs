use std::io::Write;
use std::time::Duration;

use super::{
    looks_like_path, parse_bool, parse_duration, read_value_or_file, resolve_source_api_key,
};
use crate::foundry::SourceCredentials;

#[test]
fn parse_duration_units() {
    assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
    assert_eq!(parse_duration("2h45m").unwrap(), Duration::from_secs(9900));
    assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
}

#[test]
fn parse_duration_rejects_missing_or_unknown_units() {
    for bad in ["", "30", "10x", "abc", "s", "1..5s"] {
        let err = parse_duration(bad).unwrap_err();
        assert!(
            format!("{err}").starts_with("invalid duration"),
            "{bad}: {err}"
        );
    }
}

#[test]
fn parse_bool_accepts_classic_spellings() {
    for yes in ["1", "t", "T", "true", "TRUE", "True"] {
        assert!(parse_bool(yes).unwrap(), "{yes}");
    }
    for no in ["0", "f", "F", "false", "FALSE", "False"] {
        assert!(!parse_bool(no).unwrap(), "{no}");
    }
    assert!(parse_bool("yes").is_err());
}

#[test]
fn looks_like_path_is_conservative() {
    assert!(looks_like_path("/etc/secret"));
    assert!(looks_like_path("./key.txt"));
    assert!(looks_like_path("../key.txt"));
    assert!(looks_like_path("secrets/key"));
    assert!(!looks_like_path("AIzaSyExampleLiteralKey"));
}

#[test]
fn read_value_or_file_reads_paths_and_keeps_literals() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "  key-from-file  ").unwrap();
    let from_file =
        read_value_or_file(file.path().to_str().unwrap(), "GEMINI_API_KEY").unwrap();
    assert_eq!(from_file, "key-from-file");

    assert_eq!(
        read_value_or_file("literal-key", "GEMINI_API_KEY").unwrap(),
        "literal-key"
    );

    let err = read_value_or_file("/no/such/credential/file", "GEMINI_API_KEY").unwrap_err();
    assert!(format!("{err:#}").starts_with("read GEMINI_API_KEY file"));
}

fn creds(text: &str) -> SourceCredentials {
    SourceCredentials::parse(text).unwrap()
}

#[test]
fn explicit_source_and_secret() {
    let c = creds(r#"{"gem": {"custom": "k-1"}}"#);
    assert_eq!(resolve_source_api_key(&c, "gem", "custom").unwrap(), "k-1");
}

#[test]
fn explicit_source_missing_secret() {
    let c = creds(r#"{"gem": {"other": "x", "more": "y"}}"#);
    let err = resolve_source_api_key(&c, "gem", "custom").unwrap_err();
    let text = format!("{err}");
    assert!(
        text.starts_with("could not find Gemini API key in SOURCE_CREDENTIALS for source \"gem\""),
        "{text}"
    );
    assert!(text.contains("set GEMINI_SOURCE_SECRET_NAME or GEMINI_API_KEY"), "{text}");
}

#[test]
fn unknown_source_name() {
    let c = creds(r#"{"gem": {"apiKey": "k"}}"#);
    let err = resolve_source_api_key(&c, "nope", "").unwrap_err();
    assert!(
        format!("{err}").starts_with("SOURCE_CREDENTIALS missing source \"nope\""),
        "{err}"
    );
}

#[test]
fn single_source_infers_candidate_key() {
    let c = creds(r#"{"gem": {"apiKey": "k-2", "endpoint": "https://x"}}"#);
    assert_eq!(resolve_source_api_key(&c, "", "").unwrap(), "k-2");
}

#[test]
fn single_source_single_secret_is_assumed() {
    let c = creds(r#"{"gem": {"weirdName": "k-3"}}"#);
    assert_eq!(resolve_source_api_key(&c, "", "").unwrap(), "k-3");
}

#[test]
fn single_source_with_ambiguous_secrets() {
    let c = creds(r#"{"gem": {"alpha": "a", "beta": "b"}}"#);
    let err = resolve_source_api_key(&c, "", "").unwrap_err();
    assert!(
        format!("{err}").starts_with("could not infer Gemini API key from SOURCE_CREDENTIALS (source \"gem\""),
        "{err}"
    );
}

#[test]
fn multiple_sources_single_match_wins() {
    let c = creds(r#"{"gem": {"apiKey": "k-4"}, "db": {"password": "p", "user": "u"}}"#);
    assert_eq!(resolve_source_api_key(&c, "", "").unwrap(), "k-4");
}

#[test]
fn multiple_sources_with_ambiguous_match() {
    let c = creds(r#"{"a": {"apiKey": "k1"}, "b": {"api_key": "k2"}}"#);
    let err = resolve_source_api_key(&c, "", "").unwrap_err();
    assert!(
        format!("{err}")
            .starts_with("multiple Sources in SOURCE_CREDENTIALS could provide the Gemini API key"),
        "{err}"
    );
}

#[test]
fn multiple_sources_with_no_match() {
    let c = creds(r#"{"a": {"x": "1", "y": "2"}, "b": {"p": "3", "q": "4"}}"#);
    let err = resolve_source_api_key(&c, "", "").unwrap_err();
    let text = format!("{err}");
    assert!(
        text.starts_with("could not infer Gemini API key from SOURCE_CREDENTIALS; set GEMINI_SOURCE_API_NAME"),
        "{text}"
    );
    assert!(text.contains("[\"a\", \"b\"]"), "{text}");
}
