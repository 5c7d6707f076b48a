//! Credential masking for error messages and stored payloads.

use regex::Regex;
use std::sync::OnceLock;

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // Anthropic / OpenAI style secret keys
            Regex::new(r"sk-[A-Za-z0-9_\-]{8,}").unwrap(),
            // Bearer tokens in echoed headers or messages
            Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/\-]{8,}=*").unwrap(),
            // api-key / x-api-key values in echoed headers
            Regex::new(r#"(?i)(x-)?api[-_]?key["':=\s]+[A-Za-z0-9._\-]{8,}"#).unwrap(),
            // Gemini-style key query parameter
            Regex::new(r"(?i)[?&]key=[A-Za-z0-9_\-]{8,}").unwrap(),
        ]
    })
}

/// Replace anything that looks like a credential with a fixed mask.
/// Applied to every error message before it reaches a client or a log row.
pub fn mask_secrets(input: &str) -> String {
    let mut out = input.to_string();
    for re in patterns() {
        out = re.replace_all(&out, "***").into_owned();
    }
    out
}

/// Sanitize a header value for storage: credential-bearing headers keep
/// their name but lose their value.
pub fn sanitize_header(name: &str, value: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "authorization" | "x-api-key" | "x-goog-api-key" | "proxy-authorization" => {
            "***".to_string()
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sk_key() {
        let masked = mask_secrets("upstream rejected key sk-ant-abc123def456");
        assert!(!masked.contains("sk-ant"));
        assert!(masked.contains("***"));
    }

    #[test]
    fn test_mask_bearer() {
        let masked = mask_secrets("header was Authorization: Bearer abcdef123456789");
        assert!(!masked.contains("abcdef123456789"));
    }

    #[test]
    fn test_mask_query_key() {
        let masked = mask_secrets("POST /v1beta/models/g:generateContent?key=AIzaSyFakeKey123");
        assert!(!masked.contains("AIzaSy"));
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(mask_secrets("model not found"), "model not found");
    }

    #[test]
    fn test_sanitize_header() {
        assert_eq!(sanitize_header("Authorization", "Bearer tok"), "***");
        assert_eq!(sanitize_header("x-api-key", "secret"), "***");
        assert_eq!(sanitize_header("content-type", "application/json"), "application/json");
    }
}
