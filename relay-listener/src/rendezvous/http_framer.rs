//! Hybrid-HTTP framing over a single rendezvous WebSocket: request/response
//! envelopes plus body fragment framing with dual termination signaling.

use crate::control::{HeaderPair, RequestInfo, ResponsePayload};
use crate::error::{RelayError, RelayErrorKind};
use crate::tracking::TrackingContext;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type RendezvousSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type RendezvousSink = SplitSink<RendezvousSocket, WsMessage>;

/// One decoded body fragment read off the rendezvous socket.
pub struct BodyFrame {
    /// The fragment's payload bytes.
    pub data: Vec<u8>,
    /// Whether this is the terminal fragment.
    pub last: bool,
}

/// Encodes a body chunk with a one-byte leading flag (`0` = more data
/// follows, `1` = this is the final fragment), so the terminator is
/// recognizable either by that flag or, per the dual-signal requirement, by
/// frame emptiness: the all-zero-length terminator is sent as a bare empty
/// binary frame with no flag byte at all.
pub fn encode_body_chunk(data: &[u8], last: bool) -> WsMessage {
    let mut payload = Vec::with_capacity(data.len() + 1);
    payload.push(last as u8);
    payload.extend_from_slice(data);
    WsMessage::Binary(payload.into())
}

/// The explicit zero-length terminator frame.
pub fn encode_terminator() -> WsMessage {
    WsMessage::Binary(Vec::new().into())
}

/// Decodes a binary body frame, recognizing both an empty frame and a
/// flagged final fragment as "this is the terminator".
pub fn decode_body_frame(raw: &[u8]) -> BodyFrame {
    if raw.is_empty() {
        return BodyFrame { data: Vec::new(), last: true };
    }
    let last = raw[0] != 0;
    BodyFrame {
        data: raw[1..].to_vec(),
        last,
    }
}

/// The application-facing view of an inbound HTTP-mode rendezvous: method,
/// target, headers, and a handle to read the request body.
pub struct HttpRequestContext {
    /// The HTTP method, e.g. `GET`.
    pub method: String,
    /// The request path and query string.
    pub target: String,
    /// Request headers, preserving multiplicity and order.
    pub headers: Vec<HeaderPair>,
    /// This rendezvous's tracking context.
    pub tracking: TrackingContext,
    body_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl HttpRequestContext {
    pub(crate) fn new(info: RequestInfo, tracking: TrackingContext, body_rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            method: info.method,
            target: info.target,
            headers: info.headers,
            tracking,
            body_rx: Mutex::new(body_rx),
        }
    }

    /// Reads the next body chunk, or `None` once the body is exhausted.
    /// Independent of [`HttpResponseWriter`]'s buffer, so reading the
    /// request and writing the response never contend on the same lock.
    pub async fn read_body_chunk(&self) -> Option<Vec<u8>> {
        self.body_rx.lock().await.recv().await
    }
}

/// Header metadata recorded by [`HttpResponseWriter::start`] but not yet
/// flushed onto the wire — its `body` flag isn't decided until the caller
/// either writes a chunk or finishes without one.
struct PendingResponse {
    status_code: u16,
    reason: Option<String>,
    headers: Vec<HeaderPair>,
}

enum ResponseState {
    NotStarted,
    Pending(PendingResponse),
    Sent,
}

/// The application-facing handle for writing an HTTP-mode response: one
/// metadata message, then zero or more body frames, then a terminator.
pub struct HttpResponseWriter {
    sink: Arc<Mutex<RendezvousSink>>,
    state: Mutex<ResponseState>,
    tracking: TrackingContext,
}

impl HttpResponseWriter {
    pub(crate) fn new(sink: Arc<Mutex<RendezvousSink>>, tracking: TrackingContext) -> Self {
        Self {
            sink,
            state: Mutex::new(ResponseState::NotStarted),
            tracking,
        }
    }

    /// Records the response metadata. A second call is a no-op: HTTP
    /// semantics only allow headers once. The metadata is held back from the
    /// wire until [`Self::write_body_chunk`] or [`Self::finish`] is called,
    /// since only then is whether the response carries a body known.
    pub async fn start(&self, status_code: u16, reason: Option<String>, headers: Vec<HeaderPair>) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        if matches!(*state, ResponseState::NotStarted) {
            *state = ResponseState::Pending(PendingResponse { status_code, reason, headers });
        }
        Ok(())
    }

    /// Streams one body fragment. Implicitly starts the response with a bare
    /// 200 if the handler writes a body before calling [`Self::start`].
    pub async fn write_body_chunk(&self, chunk: Vec<u8>) -> Result<(), RelayError> {
        self.flush_if_pending(true).await?;
        self.sink
            .lock()
            .await
            .send(encode_body_chunk(&chunk, false))
            .await
            .map_err(|e| self.send_error(e))
    }

    /// Sends the terminator frame and closes the socket with normal closure.
    /// Implicitly starts the response with a bare 200/empty-body if the
    /// handler never wrote anything — the empty-GET scenario.
    pub async fn finish(&self) -> Result<(), RelayError> {
        self.flush_if_pending(false).await?;
        let mut sink = self.sink.lock().await;
        sink.send(encode_terminator()).await.map_err(|e| self.send_error_locked(&e))?;
        sink.close().await.map_err(|e| self.send_error_locked(&e))
    }

    /// Sends the buffered metadata message, if one is pending, stamping it
    /// with whether a body follows. A no-op once already sent.
    async fn flush_if_pending(&self, body: bool) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        let pending = match std::mem::replace(&mut *state, ResponseState::Sent) {
            ResponseState::NotStarted => PendingResponse { status_code: 200, reason: None, headers: Vec::new() },
            ResponseState::Pending(pending) => pending,
            ResponseState::Sent => return Ok(()),
        };
        let envelope = crate::control::ControlMessage::Response(ResponsePayload {
            status_code: pending.status_code,
            reason: pending.reason,
            headers: pending.headers,
            body,
        });
        let text = serde_json::to_string(&envelope).expect("ControlMessage always serializes");
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| self.send_error(e))
    }

    fn send_error(&self, e: tokio_tungstenite::tungstenite::Error) -> RelayError {
        RelayError::new(RelayErrorKind::ConnectionLost, format!("rendezvous write failed: {e}"), self.tracking.clone())
    }

    fn send_error_locked(&self, e: &tokio_tungstenite::tungstenite::Error) -> RelayError {
        RelayError::new(RelayErrorKind::ConnectionLost, format!("rendezvous write failed: {e}"), self.tracking.clone())
    }
}

/// Sends the default 501 response for a request with no installed handler.
pub async fn write_not_implemented(writer: &HttpResponseWriter, tracking: &TrackingContext, target: &str) -> Result<(), RelayError> {
    let reason = format!("no request handler installed for {target} ({tracking})");
    writer.start(501, Some(reason), Vec::new()).await?;
    writer.finish().await
}

/// Sends the default 500 response after a handler panic, never including the
/// panic payload text.
pub async fn write_handler_failed(writer: &HttpResponseWriter, tracking: &TrackingContext) -> Result<(), RelayError> {
    let reason = format!("request handler failed ({tracking})");
    writer.start(500, Some(reason), Vec::new()).await?;
    writer.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_decodes_as_terminator() {
        let frame = decode_body_frame(&[]);
        assert!(frame.last);
        assert!(frame.data.is_empty());
    }

    #[test]
    fn flagged_last_chunk_decodes_as_terminator_with_data() {
        let encoded = encode_body_chunk(b"tail", true);
        let WsMessage::Binary(raw) = encoded else { panic!("expected binary") };
        let frame = decode_body_frame(&raw);
        assert!(frame.last);
        assert_eq!(frame.data, b"tail");
    }

    #[test]
    fn non_final_chunk_round_trips() {
        let encoded = encode_body_chunk(b"chunk-1", false);
        let WsMessage::Binary(raw) = encoded else { panic!("expected binary") };
        let frame = decode_body_frame(&raw);
        assert!(!frame.last);
        assert_eq!(frame.data, b"chunk-1");
    }
}
