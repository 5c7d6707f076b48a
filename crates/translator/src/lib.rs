pub mod aggregate;
pub mod claude_to_gemini;
pub mod claude_to_openai;
pub mod openai_to_claude;
pub mod openai_to_gemini;
pub mod responses;
pub mod rewrite;
pub mod thinking;
pub mod toolshim;

use conduit_core::dialect::Dialect;
use conduit_core::error::ProxyError;
use std::collections::HashMap;

/// Content block currently open on the emission side of a stream
/// translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    #[default]
    None,
    Text,
    Thinking,
    Tool,
}

/// State accumulated over the life of one stream translation.
///
/// The emission side is a finite-state machine over SSE frames: exactly
/// one `message_start`/`message_delta`/`message_stop` (for Claude
/// emission) and balanced block start/stop pairs.
#[derive(Debug, Default)]
pub struct TranslateState {
    pub response_id: String,
    pub model: String,
    pub created: i64,
    // Claude-emission FSM
    pub has_first_response: bool,
    pub block: BlockKind,
    pub response_index: i64,
    pub has_content: bool,
    pub finalized: bool,
    pub used_tool: bool,
    pub sent_message_delta: bool,
    /// Stop reason observed before its usage chunk arrived.
    pub pending_stop_reason: Option<String>,
    // OpenAI-emission bookkeeping
    pub sent_role: bool,
    pub current_tool_call_index: i64,
    pub input_tokens: u64,
}

impl TranslateState {
    pub fn new() -> Self {
        Self {
            current_tool_call_index: -1,
            ..Default::default()
        }
    }
}

/// One outgoing SSE frame in the client's dialect. `data == "[DONE]"`
/// is the OpenAI stream terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsePiece {
    pub event: Option<String>,
    pub data: String,
}

impl SsePiece {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn event(event: &str, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.to_string()),
            data: data.into(),
        }
    }

    pub fn done() -> Self {
        Self::data("[DONE]")
    }

    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }

    /// Render as wire bytes.
    pub fn encode(&self) -> String {
        match &self.event {
            Some(ev) => format!("event: {ev}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

/// Inputs to a request translation.
pub struct RequestInput<'a> {
    /// Model name to place on the upstream wire.
    pub model: &'a str,
    pub body: &'a [u8],
    pub stream: bool,
    pub reasoning_effort: Option<&'a str>,
}

/// A translated request body plus the tool-name map built along the way.
pub struct TranslatedRequest {
    pub body: Vec<u8>,
    /// Synthetic name → client name, for the response path.
    pub tool_names: HashMap<String, String>,
}

impl TranslatedRequest {
    pub fn plain(body: Vec<u8>) -> Self {
        Self {
            body,
            tool_names: HashMap::new(),
        }
    }
}

/// Inputs to a stream-frame translation.
pub struct StreamInput<'a> {
    pub event: Option<&'a str>,
    pub data: &'a [u8],
    /// Client-visible model name for emitted frames.
    pub model: &'a str,
    pub original_request: &'a [u8],
    pub tool_names: &'a HashMap<String, String>,
}

/// Inputs to a non-stream response translation.
pub struct ResponseInput<'a> {
    pub body: &'a [u8],
    pub model: &'a str,
    pub original_request: &'a [u8],
    pub tool_names: &'a HashMap<String, String>,
}

pub type RequestTransformFn = fn(&RequestInput) -> Result<TranslatedRequest, ProxyError>;

pub type StreamTransformFn =
    fn(&StreamInput, &mut TranslateState) -> Result<Vec<SsePiece>, ProxyError>;

pub type NonStreamTransformFn = fn(&ResponseInput) -> Result<Vec<u8>, ProxyError>;

pub struct ResponseTransform {
    pub stream: StreamTransformFn,
    pub non_stream: NonStreamTransformFn,
}

/// Two-dimensional table keyed by `(incoming, outgoing)`. A missing
/// entry means the conversion is unsupported and the dispatcher refuses
/// the request.
pub struct TranslatorRegistry {
    requests: HashMap<(Dialect, Dialect), RequestTransformFn>,
    responses: HashMap<(Dialect, Dialect), ResponseTransform>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            responses: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        from: Dialect,
        to: Dialect,
        request: RequestTransformFn,
        response: ResponseTransform,
    ) {
        self.requests.insert((from, to), request);
        self.responses.insert((from, to), response);
    }

    /// Whether a `(from, to)` conversion can be served.
    pub fn supports(&self, from: Dialect, to: Dialect) -> bool {
        from == to || self.requests.contains_key(&(from, to))
    }

    pub fn translate_request(
        &self,
        from: Dialect,
        to: Dialect,
        input: &RequestInput,
    ) -> Result<TranslatedRequest, ProxyError> {
        if from == to {
            // Passthrough still rewrites the model field (mapping applied).
            return Ok(TranslatedRequest::plain(replace_model_in_payload(
                input.body,
                input.model,
            )?));
        }
        match self.requests.get(&(from, to)) {
            Some(f) => f(input),
            None => Err(ProxyError::UnsupportedConversion { from, to }),
        }
    }

    /// Translate one upstream SSE frame into zero or more client frames.
    /// `from` is the client dialect, `to` the upstream dialect; the
    /// response travels `to → from`.
    pub fn translate_stream(
        &self,
        from: Dialect,
        to: Dialect,
        input: &StreamInput,
        state: &mut TranslateState,
    ) -> Result<Vec<SsePiece>, ProxyError> {
        if from == to {
            let data = String::from_utf8_lossy(input.data).to_string();
            return Ok(vec![SsePiece {
                event: input.event.map(|e| e.to_string()),
                data,
            }]);
        }
        match self.responses.get(&(from, to)) {
            Some(rt) => (rt.stream)(input, state),
            None => Err(ProxyError::UnsupportedConversion { from, to }),
        }
    }

    pub fn translate_non_stream(
        &self,
        from: Dialect,
        to: Dialect,
        input: &ResponseInput,
    ) -> Result<Vec<u8>, ProxyError> {
        if from == to {
            return Ok(input.body.to_vec());
        }
        match self.responses.get(&(from, to)) {
            Some(rt) => (rt.non_stream)(input),
            None => Err(ProxyError::UnsupportedConversion { from, to }),
        }
    }
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        build_registry()
    }
}

/// Replace the "model" field in a JSON payload with the resolved
/// upstream model name.
fn replace_model_in_payload(raw_json: &[u8], model: &str) -> Result<Vec<u8>, ProxyError> {
    let mut val: serde_json::Value = serde_json::from_slice(raw_json)?;
    if let Some(obj) = val.as_object_mut()
        && obj.contains_key("model")
    {
        obj.insert(
            "model".to_string(),
            serde_json::Value::String(model.to_string()),
        );
    }
    serde_json::to_vec(&val).map_err(|e| ProxyError::Translation(e.to_string()))
}

/// Build the full conversion table.
pub fn build_registry() -> TranslatorRegistry {
    let mut reg = TranslatorRegistry::new();

    // OpenAI chat client ↔ Claude channel
    reg.register(
        Dialect::OpenAIChat,
        Dialect::Claude,
        openai_to_claude::translate_request,
        ResponseTransform {
            stream: openai_to_claude::translate_stream_response,
            non_stream: openai_to_claude::translate_non_stream_response,
        },
    );

    // Claude client ↔ OpenAI chat channel
    reg.register(
        Dialect::Claude,
        Dialect::OpenAIChat,
        claude_to_openai::translate_request,
        ResponseTransform {
            stream: claude_to_openai::translate_stream_response,
            non_stream: claude_to_openai::translate_non_stream_response,
        },
    );

    // OpenAI chat client ↔ Gemini channel
    reg.register(
        Dialect::OpenAIChat,
        Dialect::Gemini,
        openai_to_gemini::translate_request,
        ResponseTransform {
            stream: openai_to_gemini::translate_stream_response,
            non_stream: openai_to_gemini::translate_non_stream_response,
        },
    );

    // Claude client ↔ Gemini channel
    reg.register(
        Dialect::Claude,
        Dialect::Gemini,
        claude_to_gemini::translate_request,
        ResponseTransform {
            stream: claude_to_gemini::translate_stream_response,
            non_stream: claude_to_gemini::translate_non_stream_response,
        },
    );

    // Same-platform pair: chat ↔ responses (lossless)
    reg.register(
        Dialect::OpenAIChat,
        Dialect::OpenAIResponses,
        responses::chat_request_to_responses,
        ResponseTransform {
            stream: responses::responses_stream_to_chat,
            non_stream: responses::responses_body_to_chat,
        },
    );
    reg.register(
        Dialect::OpenAIResponses,
        Dialect::OpenAIChat,
        responses::responses_request_to_chat,
        ResponseTransform {
            stream: responses::chat_stream_to_responses,
            non_stream: responses::chat_body_to_responses,
        },
    );

    reg
}
