pub mod decompress;
pub mod dispatcher;
pub mod sse;
pub mod stream_guard;
pub mod transport;

use conduit_core::error::ProxyError;
use std::time::Duration;

/// Byte stream flowing between upstream and client wrappers.
pub type ByteStream = std::pin::Pin<
    Box<dyn futures::Stream<Item = Result<bytes::Bytes, ProxyError>> + Send>,
>;

/// Build the process-wide pooled HTTP client shared by all upstream
/// requests. Safe for concurrent use.
pub fn build_http_client(connect_timeout_secs: u64) -> Result<reqwest::Client, ProxyError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {e}")))
}
