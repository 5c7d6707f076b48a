use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four wire protocols the proxy speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    OpenAIChat,
    OpenAIResponses,
    Claude,
    Gemini,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAIChat => "openai-chat",
            Self::OpenAIResponses => "openai-responses",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }

    /// Provider label used in traces and log rows.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::OpenAIChat | Self::OpenAIResponses => "openai",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }

    /// True when both dialects belong to the same platform and translate
    /// between each other losslessly.
    pub fn same_platform(&self, other: Dialect) -> bool {
        self.provider() == other.provider()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai-chat" | "openai_chat" | "openai" => Ok(Self::OpenAIChat),
            "openai-responses" | "openai_responses" | "responses" => Ok(Self::OpenAIResponses),
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            _ => Err(format!("unknown dialect: {s}")),
        }
    }
}

/// Detect the incoming dialect from the request path suffix.
pub fn detect_from_path(path: &str) -> Option<Dialect> {
    if path.ends_with("/chat/completions") || path.ends_with("/completions") {
        return Some(Dialect::OpenAIChat);
    }
    if path.ends_with("/responses") {
        return Some(Dialect::OpenAIResponses);
    }
    if path.ends_with("/messages") {
        return Some(Dialect::Claude);
    }
    if path.contains("/v1beta/models/") || path.contains("/v1beta1/publishers/google/models/") {
        return Some(Dialect::Gemini);
    }
    None
}

/// Detect the dialect from the body shape when the path is ambiguous.
///
/// Preference order: Claude (`messages[]` with typed content parts),
/// Responses (`input[]`), Chat (`messages[]` with plain content).
pub fn detect_from_body(body: &Value) -> Option<Dialect> {
    if let Some(messages) = body.get("messages").and_then(|m| m.as_array()) {
        let typed_parts = messages.iter().any(|m| {
            m.get("content")
                .and_then(|c| c.as_array())
                .is_some_and(|parts| {
                    parts.iter().any(|p| {
                        matches!(
                            p.get("type").and_then(|t| t.as_str()),
                            Some("tool_use") | Some("tool_result") | Some("thinking")
                        )
                    })
                })
        });
        // max_tokens as a required top-level field is the Claude shape
        if typed_parts || (body.get("max_tokens").is_some() && body.get("system").is_some()) {
            return Some(Dialect::Claude);
        }
        return Some(Dialect::OpenAIChat);
    }
    if body.get("input").is_some() {
        return Some(Dialect::OpenAIResponses);
    }
    if body.get("contents").is_some() {
        return Some(Dialect::Gemini);
    }
    None
}

/// Resolve the incoming dialect: body shape wins on ambiguous paths,
/// otherwise the path suffix decides.
pub fn detect(path: &str, body: &Value) -> Option<Dialect> {
    match detect_from_path(path) {
        Some(d) => Some(d),
        None => detect_from_body(body),
    }
}
