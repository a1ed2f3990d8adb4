//! Secret scrubbing for error strings that reach rows, logs, or stderr.
//!
//! Every failure message can embed upstream response text, which in turn can
//! echo credentials back. Scrub before persisting or printing, never after.
use regex::Regex;
use std::sync::OnceLock;

fn bearer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bBearer\s+[^\s"']+"#).expect("bearer regex"))
}

fn key_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(api[_-]?key|gemini[_-]?api[_-]?key)\b\s*[:=]\s*[^\s"']+"#)
            .expect("key-value regex")
    })
}

/// Replace bearer tokens and api-key style `key: value` pairs with redaction
/// markers. Idempotent, safe to apply to already-clean text.
pub fn secrets(text: &str) -> String {
    let text = bearer_re().replace_all(text, "Bearer <redacted>");
    key_value_re().replace_all(&text, "<redacted_kv>").into_owned()
}

#[cfg(test)]
mod tests {
    use super::secrets;

    #[test]
    fn scrubs_bearer_tokens() {
        let out = secrets("request failed: Authorization: Bearer abc.def-123 rejected");
        assert_eq!(out, "request failed: Authorization: Bearer <redacted> rejected");
    }

    #[test]
    fn scrubs_api_key_pairs() {
        assert_eq!(secrets("api_key=sk-123456 invalid"), "<redacted_kv> invalid");
        assert_eq!(secrets("API-Key: sk-123456"), "<redacted_kv>");
        assert_eq!(secrets("gemini_api_key = topsecret"), "<redacted_kv>");
    }

    #[test]
    fn leaves_clean_text_alone() {
        let msg = "dial tcp 10.0.0.1:443: connection refused";
        assert_eq!(secrets(msg), msg);
    }

    #[test]
    fn scrubs_multiple_occurrences() {
        let out = secrets("Bearer one then api_key=two then Bearer three");
        assert_eq!(out, "Bearer <redacted> then <redacted_kv> then Bearer <redacted>");
    }
}
