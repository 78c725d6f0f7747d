//! The long-lived listen-mode WebSocket: connect, reconnect with backoff,
//! frame decoding, and token-refresh sends.

use super::message::{ControlMessage, RenewTokenPayload};
use crate::error::{RelayError, RelayErrorKind};
use crate::status::{RelayStatus, StatusBroadcaster};
use crate::token::{TokenProvider, TokenRenewer, TokenRenewerEvent};
use crate::tracking::TrackingContext;
use crate::uri::EndpointAddress;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

const RECONNECT_BASE: Duration = Duration::from_millis(940);
const RECONNECT_MAX: Duration = Duration::from_secs(60);
const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

type ControlSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// `delay = min(RECONNECT_MAX, RECONNECT_BASE * 2^(attempts-1))`.
fn backoff_delay(attempts: u32) -> Duration {
    let scaled = RECONNECT_BASE.saturating_mul(1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX));
    scaled.min(RECONNECT_MAX)
}

/// Maintains one control WebSocket to the relay's listen endpoint, with
/// bounded exponential reconnect and periodic token renewal.
pub struct ControlChannel {
    endpoint: EndpointAddress,
    owner: TrackingContext,
    renewer: Arc<TokenRenewer>,
    status: Arc<StatusBroadcaster>,
    cancel: CancellationToken,
    closed: AtomicBool,
    max_frame_bytes: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    /// Builds a channel bound to `endpoint`, minting tokens from `provider`.
    /// `owner` is the listener's narrow tracking handle, not the listener
    /// itself — this is what keeps Listener/ControlChannel/TokenRenewer from
    /// forming a reference cycle.
    pub fn new(endpoint: EndpointAddress, provider: Arc<TokenProvider>, owner: TrackingContext) -> Arc<Self> {
        let audience = endpoint.to_sb_uri();
        let renewer = TokenRenewer::new(provider, audience, Duration::from_secs(20 * 60), owner.clone());
        Arc::new(Self {
            endpoint,
            owner,
            renewer,
            status: Arc::new(StatusBroadcaster::new()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            task: Mutex::new(None),
        })
    }

    /// Subscribes to connecting/online/offline transitions.
    pub fn status(&self) -> tokio::sync::watch::Receiver<RelayStatus> {
        self.status.subscribe()
    }

    /// Connects for the first time, spawning the background reconnect loop.
    /// Resolves once the socket is up, or with the first fatal connect error.
    /// Returns the channel through which parsed control messages are
    /// delivered in arrival order.
    pub async fn open(self: &Arc<Self>) -> Result<mpsc::UnboundedReceiver<ControlMessage>, RelayError> {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (first_tx, first_rx) = oneshot::channel();

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(messages_tx, first_tx).await });
        *self.task.lock().await = Some(handle);

        first_rx
            .await
            .map_err(|_| RelayError::new(RelayErrorKind::RelayGeneric, "control channel task exited before connecting", self.owner.clone()))?
            .map(|()| messages_rx)
    }

    /// Sends a `renewToken` envelope over the active socket. Callers outside
    /// the reconnect loop reach this only through the internal renewal
    /// subscription; exposed for tests.
    async fn send_renew_token(sink: &mut futures_util::stream::SplitSink<ControlSocket, WsMessage>, token_text: &str) -> Result<(), RelayError> {
        let envelope = ControlMessage::RenewToken(RenewTokenPayload {
            token: token_text.to_string(),
        });
        let text = serde_json::to_string(&envelope).expect("ControlMessage always serializes");
        sink.send(WsMessage::Text(text.into())).await.map_err(|e| {
            RelayError::new(RelayErrorKind::ConnectionLost, format!("failed to send renewToken: {e}"), TrackingContext::new("/control"))
        })
    }

    /// Closes the channel. Idempotent; cancels the reconnect loop and the
    /// token renewer's timer.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.renewer.close();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        self.status.publish(RelayStatus::Offline(None));
    }

    async fn run(self: Arc<Self>, messages_tx: mpsc::UnboundedSender<ControlMessage>, first_tx: oneshot::Sender<Result<(), RelayError>>) {
        let mut first_tx = Some(first_tx);
        let mut reconnect_attempts: u32 = 0;
        let mut renew_events = self.renewer.subscribe();

        let token = match self.renewer.start().await {
            Ok(token) => token,
            Err(err) => {
                if let Some(tx) = first_tx.take() {
                    let _ = tx.send(Err(err.clone()));
                }
                self.status.publish(RelayStatus::Offline(Some(err)));
                return;
            }
        };
        let mut current_token_text = token.token_text().to_string();

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            if reconnect_attempts > 0 {
                self.status.publish(RelayStatus::Offline(None));
                let delay = backoff_delay(reconnect_attempts);
                log::warn!("{}: reconnecting in {:?} (attempt {})", self.owner, delay, reconnect_attempts);
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            self.status.publish(RelayStatus::Connecting);

            match self.connect(&current_token_text).await {
                Ok(socket) => {
                    reconnect_attempts = 0;
                    self.status.publish(RelayStatus::Online);
                    if let Some(tx) = first_tx.take() {
                        let _ = tx.send(Ok(()));
                    }

                    let (mut sink, mut stream) = socket.split();
                    let drop_reason = loop {
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                let _ = sink.close().await;
                                return;
                            }
                            renewed = renew_events.recv() => {
                                match renewed {
                                    Ok(TokenRenewerEvent::Renewed(token)) => {
                                        current_token_text = token.token_text().to_string();
                                        if let Err(e) = Self::send_renew_token(&mut sink, &current_token_text).await {
                                            log::warn!("{}: token refresh send failed: {}", self.owner, e);
                                        }
                                    }
                                    Ok(TokenRenewerEvent::RenewError(e)) => {
                                        log::warn!("{}: token renewal failed, keeping current token: {}", self.owner, e);
                                    }
                                    Err(_) => {}
                                }
                            }
                            frame = stream.next() => {
                                match frame {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        self.dispatch_frame(text.as_bytes(), &messages_tx);
                                    }
                                    Some(Ok(WsMessage::Binary(data))) => {
                                        self.dispatch_frame(&data, &messages_tx);
                                    }
                                    Some(Ok(WsMessage::Close(frame))) => {
                                        break RelayError::new(
                                            RelayErrorKind::ConnectionLost,
                                            format!("peer closed control channel: {frame:?}"),
                                            self.owner.clone(),
                                        );
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        break RelayError::new(RelayErrorKind::ConnectionLost, format!("control channel read error: {e}"), self.owner.clone());
                                    }
                                    None => {
                                        break RelayError::new(RelayErrorKind::ConnectionLost, "control channel stream ended", self.owner.clone());
                                    }
                                }
                            }
                        }
                    };
                    log::warn!("{}: control channel dropped: {}", self.owner, drop_reason);
                    self.status.publish(RelayStatus::Offline(Some(drop_reason)));
                    reconnect_attempts = 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        reconnect_attempts += 1;
                        self.status.publish(RelayStatus::Offline(Some(err)));
                    } else {
                        log::error!("{}: fatal control channel error, giving up: {}", self.owner, err);
                        if let Some(tx) = first_tx.take() {
                            let _ = tx.send(Err(err.clone()));
                        }
                        self.status.publish(RelayStatus::Offline(Some(err)));
                        return;
                    }
                }
            }
        }
    }

    fn dispatch_frame(&self, raw: &[u8], messages_tx: &mpsc::UnboundedSender<ControlMessage>) {
        if raw.len() > self.max_frame_bytes {
            log::warn!("{}: dropping oversized control frame ({} bytes)", self.owner, raw.len());
            return;
        }
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => {
                log::warn!("{}: dropping non-UTF8 control frame", self.owner);
                return;
            }
        };
        match ControlMessage::parse(text) {
            Ok(Some(message)) => {
                let _ = messages_tx.send(message);
            }
            Ok(None) => {
                log::debug!("{}: ignoring control frame with unknown discriminant", self.owner);
            }
            Err(e) => {
                log::warn!("{}: malformed control frame: {}", self.owner, e);
            }
        }
    }

    async fn connect(&self, token_text: &str) -> Result<ControlSocket, RelayError> {
        let uri = self.endpoint.listen_uri(self.owner.tracking_id());
        let request = http::Request::builder()
            .method("GET")
            .uri(uri.as_str())
            .header("Host", self.endpoint.host())
            .header("ServiceBusAuthorization", token_text)
            .body(())
            .map_err(|e| RelayError::new(RelayErrorKind::Validation, format!("invalid listen request: {e}"), self.owner.clone()))?;

        connect_async(request).await.map(|(socket, _response)| socket).map_err(|e| {
            let kind = classify_connect_error(&e);
            RelayError::new(kind, format!("listen connect failed: {e}"), self.owner.clone())
        })
    }
}

fn classify_connect_error(err: &tokio_tungstenite::tungstenite::Error) -> RelayErrorKind {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::Http(response) => match response.status().as_u16() {
            401 | 403 => RelayErrorKind::AuthorizationFailed,
            404 => RelayErrorKind::EndpointNotFound,
            409 => RelayErrorKind::EndpointAlreadyExists,
            429 => RelayErrorKind::QuotaExceeded,
            _ => RelayErrorKind::RelayGeneric,
        },
        _ => RelayErrorKind::RelayGeneric,
    }
}
