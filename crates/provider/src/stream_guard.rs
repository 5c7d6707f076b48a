//! SSE stream wrappers: keep-alive comment injection and the idle
//! watchdog. Both are pure stream combinators; cancellation unwinds them
//! when the client disconnects and the response body is dropped.

use crate::ByteStream;
use bytes::Bytes;
use conduit_core::error::ProxyError;
use futures::StreamExt;
use std::time::Duration;

const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

/// Inject a `: keep-alive` comment frame whenever no upstream byte has
/// been seen for `interval`.
pub fn keep_alive(upstream: ByteStream, interval: Duration) -> ByteStream {
    let stream = futures::stream::unfold(
        (upstream, false),
        move |(mut upstream, done)| async move {
            if done {
                return None;
            }
            match tokio::time::timeout(interval, upstream.next()).await {
                Ok(Some(item)) => {
                    let failed = item.is_err();
                    Some((item, (upstream, failed)))
                }
                Ok(None) => None,
                Err(_) => Some((Ok(Bytes::from_static(KEEP_ALIVE_FRAME)), (upstream, false))),
            }
        },
    );
    Box::pin(stream)
}

/// Close the stream with a `stream_timeout` error when the upstream stays
/// silent past `idle`. Unlike the keep-alive wrapper this gives up: the
/// upstream body is dropped and the error terminates the client stream.
pub fn idle_watchdog(upstream: ByteStream, idle: Duration) -> ByteStream {
    let stream = futures::stream::unfold(
        (upstream, false),
        move |(mut upstream, done)| async move {
            if done {
                return None;
            }
            match tokio::time::timeout(idle, upstream.next()).await {
                Ok(Some(item)) => {
                    let failed = item.is_err();
                    Some((item, (upstream, failed)))
                }
                Ok(None) => None,
                Err(_) => {
                    tracing::warn!("upstream stream idle past {:?}, closing", idle);
                    Some((
                        Err(ProxyError::StreamTimeout(format!(
                            "no upstream data for {}s",
                            idle.as_secs()
                        ))),
                        (upstream, true),
                    ))
                }
            }
        },
    );
    Box::pin(stream)
}
