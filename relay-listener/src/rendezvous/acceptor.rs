//! Dispatches `accept` control messages: dials the rendezvous socket and
//! routes it to either the raw-stream accept-queue or the HTTP framer.

use super::http_framer::{write_handler_failed, write_not_implemented, HttpRequestContext, HttpResponseWriter};
use crate::control::AcceptPayload;
use crate::error::{RelayError, RelayErrorKind};
use crate::tracking::TrackingContext;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The duplex WebSocket handed to an application for raw-stream mode.
pub type RawStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Installed by the application to service HTTP-mode rendezvous.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles one HTTP request/response exchange. Panicking here is
    /// reported to the caller as a 500 with no leaked panic text; it does
    /// not take down the acceptor or the control channel.
    async fn handle(&self, request: HttpRequestContext, response: HttpResponseWriter);
}

/// A raw stream delivered to the listener's accept-queue.
pub struct AcceptedStream {
    /// The duplex rendezvous socket.
    pub socket: RawStream,
    /// This rendezvous's tracking context.
    pub tracking: TrackingContext,
}

/// The default ARP-cache-mitigation pause before dialing a rendezvous
/// socket. Whether this is still warranted on modern NIC drivers is an
/// open question; kept as a small fixed delay rather than removed.
pub const DEFAULT_ARP_PAUSE: Duration = Duration::from_millis(2);

/// The default budget for dialing a rendezvous socket.
pub const DEFAULT_DIAL_BUDGET: Duration = Duration::from_secs(20);

/// Accepts rendezvous requests dispatched from the control channel.
pub struct RendezvousAcceptor {
    owner: TrackingContext,
    active: StdMutex<HashSet<String>>,
    accept_tx: mpsc::UnboundedSender<AcceptedStream>,
    closed: AtomicBool,
    arp_pause: Duration,
    dial_budget: Duration,
    request_handler: Mutex<Option<Arc<dyn RequestHandler>>>,
}

impl RendezvousAcceptor {
    pub fn new(owner: TrackingContext, accept_tx: mpsc::UnboundedSender<AcceptedStream>) -> Arc<Self> {
        Arc::new(Self {
            owner,
            active: StdMutex::new(HashSet::new()),
            accept_tx,
            closed: AtomicBool::new(false),
            arp_pause: DEFAULT_ARP_PAUSE,
            dial_budget: DEFAULT_DIAL_BUDGET,
            request_handler: Mutex::new(None),
        })
    }

    /// Installs (or replaces) the HTTP-mode request handler.
    pub async fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.request_handler.lock().await = Some(handler);
    }

    /// Marks the acceptor closed: subsequent `accept` messages are rejected
    /// without dialing. Does not affect rendezvous already in flight.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// The number of rendezvous ids currently registered as active.
    pub fn active_count(&self) -> usize {
        self.active.lock().expect("rendezvous map lock poisoned").len()
    }

    /// Handles one `accept` control message. Spawned as a detached task by
    /// the caller so that rendezvous handling runs concurrently and in
    /// arrival-independent order, per the control channel's dispatch
    /// guarantee.
    pub async fn handle_accept(self: &Arc<Self>, payload: AcceptPayload) {
        let id = payload.id.clone();
        {
            let mut active = self.active.lock().expect("rendezvous map lock poisoned");
            if self.closed.load(Ordering::SeqCst) {
                log::warn!("{}: rejecting accept {} — listener is closed", self.owner, id);
                return;
            }
            if !active.insert(id.clone()) {
                log::warn!("{}: rejecting duplicate accept id {}", self.owner, id);
                return;
            }
        }

        let tracking = TrackingContext::with_id(id.clone(), self.owner.subsystem_id());
        let outcome = self.dial_and_route(payload, tracking.clone()).await;
        if let Err(err) = outcome {
            log::warn!("{}: rendezvous {} failed: {}", self.owner, id, err);
        }
        self.active.lock().expect("rendezvous map lock poisoned").remove(&id);
    }

    async fn dial_and_route(self: &Arc<Self>, payload: AcceptPayload, tracking: TrackingContext) -> Result<(), RelayError> {
        tokio::time::sleep(self.arp_pause).await;

        let socket = tokio::time::timeout(self.dial_budget, connect_async(payload.address.as_str()))
            .await
            .map_err(|_| RelayError::new(RelayErrorKind::ConnectionLost, "rendezvous dial timed out", tracking.clone()))?
            .map_err(|e| RelayError::new(RelayErrorKind::ConnectionLost, format!("rendezvous dial failed: {e}"), tracking.clone()))?
            .0;

        match payload.request_info {
            None => {
                if self.closed.load(Ordering::SeqCst) {
                    return Ok(());
                }
                self.accept_tx
                    .send(AcceptedStream { socket, tracking })
                    .map_err(|_| RelayError::new(RelayErrorKind::RelayGeneric, "accept queue is closed", self.owner.clone()))
            }
            Some(info) => self.serve_http(socket, info, tracking).await,
        }
    }

    async fn serve_http(
        self: &Arc<Self>,
        socket: RawStream,
        info: crate::control::RequestInfo,
        tracking: TrackingContext,
    ) -> Result<(), RelayError> {
        let (sink, mut stream) = socket.split();
        let sink = Arc::new(Mutex::new(sink));
        let (body_tx, body_rx) = mpsc::unbounded_channel();

        let target = info.target.clone();
        let request = HttpRequestContext::new(info, tracking.clone(), body_rx);
        let response = HttpResponseWriter::new(Arc::clone(&sink), tracking.clone());

        let reader_tracking = tracking.clone();
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Binary(raw))) => {
                        let frame = super::http_framer::decode_body_frame(&raw);
                        let done = frame.last;
                        if !frame.data.is_empty() && body_tx.send(frame.data).is_err() {
                            break;
                        }
                        if done {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("{reader_tracking}: rendezvous body read error: {e}");
                        break;
                    }
                }
            }
        });

        let handler = self.request_handler.lock().await.clone();
        match handler {
            Some(handler) => {
                let handled = std::panic::AssertUnwindSafe(handler.handle(request, response));
                if futures_util::FutureExt::catch_unwind(handled).await.is_err() {
                    log::error!("{tracking}: request handler panicked while serving {target}");
                    // The handler may have panicked before writing anything; the
                    // socket is still open, so best-effort report it as a 500.
                    let fallback = HttpResponseWriter::new(sink, tracking.clone());
                    let _ = write_handler_failed(&fallback, &tracking).await;
                }
                Ok(())
            }
            None => {
                let _ = request;
                write_not_implemented(&response, &tracking, &target).await
            }
        }
    }
}
