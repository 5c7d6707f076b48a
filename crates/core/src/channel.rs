use crate::dialect::Dialect;
use crate::glob::glob_match;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upstream provider family a channel speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    Openai,
    Claude,
    Gemini,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::Openai),
            "claude" | "anthropic" => Ok(Self::Claude),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(format!("unknown channel kind: {s}")),
        }
    }
}

/// Wire endpoint for OpenAI channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenAiEndpoint {
    #[default]
    Chat,
    Responses,
}

impl std::str::FromStr for OpenAiEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "responses" => Ok(Self::Responses),
            _ => Err(format!("unknown openai endpoint: {s}")),
        }
    }
}

/// An upstream endpoint with its own base URL, dialect, and credentials.
/// Immutable for the duration of a request.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub kind: ChannelKind,
    /// Refines the outgoing dialect for OpenAI channels.
    pub endpoint: OpenAiEndpoint,
    pub base_url: String,
    pub api_key: String,
    /// Extra headers applied to every upstream request.
    pub headers: HashMap<String, String>,
    /// Merged into the translated request body (channel-level overrides).
    pub custom_params: Option<serde_json::Value>,
    /// Model patterns this channel serves (`*` wildcards allowed).
    pub model_globs: Vec<String>,
    pub disabled: bool,
}

impl Channel {
    /// The dialect spoken on the wire to this channel.
    pub fn outgoing_dialect(&self) -> Dialect {
        match self.kind {
            ChannelKind::Openai => match self.endpoint {
                OpenAiEndpoint::Chat => Dialect::OpenAIChat,
                OpenAiEndpoint::Responses => Dialect::OpenAIResponses,
            },
            ChannelKind::Claude => Dialect::Claude,
            ChannelKind::Gemini => Dialect::Gemini,
        }
    }

    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Check whether this channel serves the given (mapped) model name.
    /// An empty pattern list serves everything.
    pub fn serves_model(&self, model: &str) -> bool {
        if self.disabled {
            return false;
        }
        if self.model_globs.is_empty() {
            return true;
        }
        self.model_globs.iter().any(|p| glob_match(p, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(kind: ChannelKind, endpoint: OpenAiEndpoint, globs: &[&str]) -> Channel {
        Channel {
            id: 1,
            name: "test".into(),
            kind,
            endpoint,
            base_url: "https://example.com/".into(),
            api_key: "k".into(),
            headers: HashMap::new(),
            custom_params: None,
            model_globs: globs.iter().map(|s| s.to_string()).collect(),
            disabled: false,
        }
    }

    #[test]
    fn test_outgoing_dialect() {
        let c = channel(ChannelKind::Openai, OpenAiEndpoint::Chat, &[]);
        assert_eq!(c.outgoing_dialect(), Dialect::OpenAIChat);
        let c = channel(ChannelKind::Openai, OpenAiEndpoint::Responses, &[]);
        assert_eq!(c.outgoing_dialect(), Dialect::OpenAIResponses);
        let c = channel(ChannelKind::Claude, OpenAiEndpoint::Chat, &[]);
        assert_eq!(c.outgoing_dialect(), Dialect::Claude);
    }

    #[test]
    fn test_serves_model() {
        let c = channel(ChannelKind::Claude, OpenAiEndpoint::Chat, &["claude-*"]);
        assert!(c.serves_model("claude-sonnet-4"));
        assert!(!c.serves_model("gpt-4o"));

        let any = channel(ChannelKind::Openai, OpenAiEndpoint::Chat, &[]);
        assert!(any.serves_model("anything"));

        let mut disabled = channel(ChannelKind::Claude, OpenAiEndpoint::Chat, &[]);
        disabled.disabled = true;
        assert!(!disabled.serves_model("claude-sonnet-4"));
    }

    #[test]
    fn test_base_url_trimmed() {
        let c = channel(ChannelKind::Openai, OpenAiEndpoint::Chat, &[]);
        assert_eq!(c.base_url_trimmed(), "https://example.com");
    }
}
