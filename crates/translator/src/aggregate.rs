//! Forced-stream aggregation: a non-streaming client served from a
//! streaming upstream. SSE frames are buffered (bounded) and the latest
//! full `response` object from a terminal event becomes the JSON body.

use conduit_core::error::ProxyError;
use serde_json::Value;

/// Hard cap on the bytes buffered during aggregation (50 MiB).
pub const MAX_AGGREGATE_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct StreamAggregator {
    buffered_bytes: usize,
    final_response: Option<Value>,
    done: bool,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one SSE frame from the upstream.
    pub fn push_frame(&mut self, event: Option<&str>, data: &[u8]) -> Result<(), ProxyError> {
        self.buffered_bytes += data.len();
        if self.buffered_bytes > MAX_AGGREGATE_BYTES {
            return Err(ProxyError::Protocol(format!(
                "aggregated stream exceeds {MAX_AGGREGATE_BYTES} bytes"
            )));
        }

        if data == b"[DONE]" {
            self.done = true;
            return Ok(());
        }

        let Ok(value) = serde_json::from_slice::<Value>(data) else {
            return Ok(());
        };
        let event = event
            .map(str::to_string)
            .or_else(|| value.get("type").and_then(|t| t.as_str()).map(str::to_string));

        if matches!(
            event.as_deref(),
            Some("response.completed") | Some("response.done")
        ) && let Some(resp) = value.get("response")
        {
            self.final_response = Some(resp.clone());
            // Some upstreams never send [DONE] after the terminal event.
            self.done = true;
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Emit the aggregated JSON body.
    pub fn finish(self) -> Result<Vec<u8>, ProxyError> {
        match self.final_response {
            Some(resp) => serde_json::to_vec(&resp)
                .map_err(|e| ProxyError::Internal(format!("serialize aggregate: {e}"))),
            None => Err(ProxyError::Protocol(
                "missing final response.completed event".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregates_final_response() {
        let mut agg = StreamAggregator::new();
        agg.push_frame(
            Some("response.created"),
            br#"{"type":"response.created","response":{"id":"r1","status":"in_progress"}}"#,
        )
        .unwrap();
        agg.push_frame(
            Some("response.output_text.delta"),
            br#"{"type":"response.output_text.delta","delta":"hi"}"#,
        )
        .unwrap();
        agg.push_frame(
            Some("response.completed"),
            br#"{"type":"response.completed","response":{"id":"r1","object":"response","status":"completed"}}"#,
        )
        .unwrap();
        agg.push_frame(None, b"[DONE]").unwrap();

        assert!(agg.is_done());
        let body = agg.finish().unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["object"], "response");
        assert_eq!(v["status"], "completed");
    }

    #[test]
    fn test_missing_terminal_event() {
        let mut agg = StreamAggregator::new();
        agg.push_frame(
            Some("response.output_text.delta"),
            br#"{"type":"response.output_text.delta","delta":"hi"}"#,
        )
        .unwrap();
        agg.push_frame(None, b"[DONE]").unwrap();

        let err = agg.finish().unwrap_err();
        assert!(err.to_string().contains("missing final response.completed"));
    }

    #[test]
    fn test_buffer_cap() {
        let mut agg = StreamAggregator::new();
        agg.buffered_bytes = MAX_AGGREGATE_BYTES;
        let err = agg.push_frame(None, b"{}");
        assert!(err.is_err());
    }
}
