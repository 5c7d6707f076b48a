use crate::dialect::Dialect;
use serde_json::Value;

/// Token counts harmonized across providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_creation_tokens: Option<u64>,
}

impl Usage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.cache_read_tokens.is_none()
            && self.cache_creation_tokens.is_none()
    }

    /// Merge another observation, preferring present fields from `other`.
    pub fn merge(&mut self, other: &Usage) {
        if other.input_tokens.is_some() {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens.is_some() {
            self.output_tokens = other.output_tokens;
        }
        if other.cache_read_tokens.is_some() {
            self.cache_read_tokens = other.cache_read_tokens;
        }
        if other.cache_creation_tokens.is_some() {
            self.cache_creation_tokens = other.cache_creation_tokens;
        }
    }
}

/// Outcome of feeding one SSE frame to a usage parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SseUsage {
    pub usage: Option<Usage>,
    /// True when this frame carries the stream's terminal usage.
    pub is_final: bool,
}

/// Per-provider token extraction from SSE frames and response bodies.
///
/// Parsers are stateful per request: the Anthropic parser carries input
/// tokens from `message_start` into the `message_delta` re-emission.
pub trait UsageParser: Send {
    /// Feed one SSE frame. Returns `None` when the frame carries nothing.
    fn consume_sse(&mut self, event: Option<&str>, data: &[u8]) -> Option<SseUsage>;

    /// Extract usage from a complete non-streaming body.
    fn parse_response(&self, body: &[u8]) -> Option<Usage>;
}

/// Build the parser for a given upstream dialect.
pub fn parser_for(dialect: Dialect) -> Box<dyn UsageParser> {
    match dialect {
        Dialect::Claude => Box::new(AnthropicUsage::default()),
        Dialect::OpenAIChat => Box::new(OpenAiChatUsage),
        Dialect::OpenAIResponses => Box::new(OpenAiResponsesUsage),
        Dialect::Gemini => Box::new(GeminiUsage),
    }
}

fn parse_json(data: &[u8]) -> Option<Value> {
    if data == b"[DONE]" {
        return None;
    }
    serde_json::from_slice(data).ok()
}

fn u64_at<'a>(v: &'a Value, path: &[&str]) -> Option<u64> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_u64()
}

// ─── Anthropic ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct AnthropicUsage {
    input_tokens: Option<u64>,
    cache_read: Option<u64>,
    cache_creation: Option<u64>,
}

impl AnthropicUsage {
    fn usage_from(&self, u: &Value) -> Usage {
        Usage {
            input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).or(self.input_tokens),
            output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()),
            cache_read_tokens: u
                .get("cache_read_input_tokens")
                .and_then(|v| v.as_u64())
                .or(self.cache_read),
            cache_creation_tokens: u
                .get("cache_creation_input_tokens")
                .and_then(|v| v.as_u64())
                .or(self.cache_creation),
        }
    }
}

impl UsageParser for AnthropicUsage {
    fn consume_sse(&mut self, event: Option<&str>, data: &[u8]) -> Option<SseUsage> {
        let v = parse_json(data)?;
        let event = event.or_else(|| v.get("type").and_then(|t| t.as_str()))?;
        match event {
            "message_start" => {
                // Reset per-message state and capture input/cache tokens.
                let usage = v.get("message").and_then(|m| m.get("usage"))?;
                self.input_tokens = usage.get("input_tokens").and_then(|t| t.as_u64());
                self.cache_read = usage.get("cache_read_input_tokens").and_then(|t| t.as_u64());
                self.cache_creation = usage
                    .get("cache_creation_input_tokens")
                    .and_then(|t| t.as_u64());
                Some(SseUsage {
                    usage: Some(self.usage_from(usage)),
                    is_final: false,
                })
            }
            "message_delta" => {
                let usage = v.get("usage")?;
                Some(SseUsage {
                    usage: Some(self.usage_from(usage)),
                    is_final: true,
                })
            }
            _ => None,
        }
    }

    fn parse_response(&self, body: &[u8]) -> Option<Usage> {
        let v: Value = serde_json::from_slice(body).ok()?;
        let u = v.get("usage")?;
        Some(Usage {
            input_tokens: u.get("input_tokens").and_then(|t| t.as_u64()),
            output_tokens: u.get("output_tokens").and_then(|t| t.as_u64()),
            cache_read_tokens: u.get("cache_read_input_tokens").and_then(|t| t.as_u64()),
            cache_creation_tokens: u
                .get("cache_creation_input_tokens")
                .and_then(|t| t.as_u64()),
        })
    }
}

// ─── OpenAI chat completions ───────────────────────────────────────────────

pub struct OpenAiChatUsage;

fn openai_chat_usage(u: &Value) -> Usage {
    Usage {
        input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()),
        output_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()),
        cache_read_tokens: u64_at(u, &["prompt_tokens_details", "cached_tokens"]),
        cache_creation_tokens: None,
    }
}

impl UsageParser for OpenAiChatUsage {
    fn consume_sse(&mut self, _event: Option<&str>, data: &[u8]) -> Option<SseUsage> {
        let v = parse_json(data)?;
        let u = v.get("usage").filter(|u| !u.is_null())?;
        Some(SseUsage {
            usage: Some(openai_chat_usage(u)),
            is_final: true,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Option<Usage> {
        let v: Value = serde_json::from_slice(body).ok()?;
        v.get("usage").map(openai_chat_usage)
    }
}

// ─── OpenAI responses ──────────────────────────────────────────────────────

pub struct OpenAiResponsesUsage;

fn openai_responses_usage(u: &Value) -> Usage {
    Usage {
        input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()),
        output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()),
        cache_read_tokens: u64_at(u, &["input_tokens_details", "cached_tokens"]),
        cache_creation_tokens: None,
    }
}

impl UsageParser for OpenAiResponsesUsage {
    fn consume_sse(&mut self, event: Option<&str>, data: &[u8]) -> Option<SseUsage> {
        let v = parse_json(data)?;
        let event = event.or_else(|| v.get("type").and_then(|t| t.as_str()))?;
        // Only the terminal event carries usage.
        if event != "response.completed" && event != "response.done" {
            return None;
        }
        let u = v.get("response").and_then(|r| r.get("usage"))?;
        Some(SseUsage {
            usage: Some(openai_responses_usage(u)),
            is_final: true,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Option<Usage> {
        let v: Value = serde_json::from_slice(body).ok()?;
        v.get("usage").map(openai_responses_usage)
    }
}

// ─── Gemini ────────────────────────────────────────────────────────────────

pub struct GeminiUsage;

fn gemini_usage(u: &Value) -> Usage {
    Usage {
        input_tokens: u.get("promptTokenCount").and_then(|v| v.as_u64()),
        output_tokens: u.get("candidatesTokenCount").and_then(|v| v.as_u64()),
        cache_read_tokens: u.get("cachedContentTokenCount").and_then(|v| v.as_u64()),
        cache_creation_tokens: None,
    }
}

impl UsageParser for GeminiUsage {
    fn consume_sse(&mut self, _event: Option<&str>, data: &[u8]) -> Option<SseUsage> {
        let v = parse_json(data)?;
        let u = v.get("usageMetadata")?;
        let finished = v
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("finishReason"))
            .is_some();
        Some(SseUsage {
            usage: Some(gemini_usage(u)),
            is_final: finished,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Option<Usage> {
        let v: Value = serde_json::from_slice(body).ok()?;
        v.get("usageMetadata").map(|u| gemini_usage(u))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_start_then_delta() {
        let mut p = AnthropicUsage::default();
        let start = br#"{"type":"message_start","message":{"usage":{"input_tokens":12,"cache_read_input_tokens":4}}}"#;
        let r = p.consume_sse(Some("message_start"), start).unwrap();
        assert!(!r.is_final);
        assert_eq!(r.usage.unwrap().input_tokens, Some(12));

        let delta = br#"{"type":"message_delta","usage":{"output_tokens":33}}"#;
        let r = p.consume_sse(Some("message_delta"), delta).unwrap();
        assert!(r.is_final);
        let u = r.usage.unwrap();
        // input/cache tokens carried over from message_start
        assert_eq!(u.input_tokens, Some(12));
        assert_eq!(u.cache_read_tokens, Some(4));
        assert_eq!(u.output_tokens, Some(33));
    }

    #[test]
    fn test_openai_chat_chunk() {
        let mut p = OpenAiChatUsage;
        assert!(p.consume_sse(None, br#"{"choices":[{"delta":{}}]}"#).is_none());

        let with_usage = br#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"prompt_tokens_details":{"cached_tokens":2}}}"#;
        let r = p.consume_sse(None, with_usage).unwrap();
        assert!(r.is_final);
        let u = r.usage.unwrap();
        assert_eq!(u.input_tokens, Some(7));
        assert_eq!(u.output_tokens, Some(3));
        assert_eq!(u.cache_read_tokens, Some(2));
    }

    #[test]
    fn test_openai_responses_only_completed() {
        let mut p = OpenAiResponsesUsage;
        let delta = br#"{"type":"response.output_text.delta","delta":"hi"}"#;
        assert!(p.consume_sse(Some("response.output_text.delta"), delta).is_none());

        let done = br#"{"type":"response.completed","response":{"usage":{"input_tokens":5,"output_tokens":9}}}"#;
        let r = p.consume_sse(Some("response.completed"), done).unwrap();
        assert!(r.is_final);
        assert_eq!(r.usage.unwrap().output_tokens, Some(9));
    }

    #[test]
    fn test_gemini_final_iff_finish_reason() {
        let mut p = GeminiUsage;
        let mid = br#"{"candidates":[{"content":{"parts":[{"text":"x"}]}}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":1}}"#;
        let r = p.consume_sse(None, mid).unwrap();
        assert!(!r.is_final);

        let last = br#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":8,"cachedContentTokenCount":2}}"#;
        let r = p.consume_sse(None, last).unwrap();
        assert!(r.is_final);
        assert_eq!(r.usage.unwrap().cache_read_tokens, Some(2));
    }

    #[test]
    fn test_done_sentinel_ignored() {
        let mut p = OpenAiChatUsage;
        assert!(p.consume_sse(None, b"[DONE]").is_none());
    }

    #[test]
    fn test_merge() {
        let mut a = Usage {
            input_tokens: Some(10),
            ..Default::default()
        };
        a.merge(&Usage {
            output_tokens: Some(4),
            ..Default::default()
        });
        assert_eq!(a.input_tokens, Some(10));
        assert_eq!(a.output_tokens, Some(4));
    }
}
