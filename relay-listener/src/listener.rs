//! The public listener surface: open, accept-next-stream, close,
//! set-request-handler, status events.

use crate::control::{ControlChannel, ControlMessage};
use crate::error::{RelayError, RelayErrorKind};
use crate::rendezvous::{AcceptedStream, RendezvousAcceptor, RequestHandler};
use crate::status::RelayStatus;
use crate::token::TokenProvider;
use crate::tracking::TrackingContext;
use crate::uri::EndpointAddress;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// A listener registered on one relay endpoint.
///
/// `open` may be called at most once; `close` is idempotent and safe to call
/// even if `open` never succeeded.
pub struct Listener {
    endpoint: EndpointAddress,
    token_provider: Arc<TokenProvider>,
    tracking: TrackingContext,
    open_called: AtomicBool,
    close_called: AtomicBool,
    control: Mutex<Option<Arc<ControlChannel>>>,
    acceptor: Mutex<Option<Arc<RendezvousAcceptor>>>,
    accept_rx: Mutex<Option<mpsc::UnboundedReceiver<AcceptedStream>>>,
    pending_handler: Mutex<Option<Arc<dyn RequestHandler>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    // A `watch` rather than a `Notify`: every caller parked behind the
    // `accept_rx` mutex subscribes only once it has acquired the lock, so a
    // `notify_waiters()` fired while they're still queued on the mutex would
    // be missed. `watch` retains the current value for late subscribers.
    closed_watch: watch::Sender<bool>,
}

impl Listener {
    /// Builds a listener bound to `endpoint`, not yet connected.
    pub fn new(endpoint: EndpointAddress, token_provider: Arc<TokenProvider>) -> Arc<Self> {
        let tracking = TrackingContext::new(format!("/listener/{}", endpoint.path()));
        let (closed_watch, _) = watch::channel(false);
        Arc::new(Self {
            endpoint,
            token_provider,
            tracking,
            open_called: AtomicBool::new(false),
            close_called: AtomicBool::new(false),
            control: Mutex::new(None),
            acceptor: Mutex::new(None),
            accept_rx: Mutex::new(None),
            pending_handler: Mutex::new(None),
            dispatch_task: Mutex::new(None),
            closed_watch,
        })
    }

    /// Installs the HTTP-mode request handler. May be called before or
    /// after `open`.
    pub async fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        if let Some(acceptor) = self.acceptor.lock().await.as_ref() {
            acceptor.set_request_handler(Arc::clone(&handler)).await;
        } else {
            *self.pending_handler.lock().await = Some(handler);
        }
    }

    /// Connects the control channel for the first time. A second call
    /// fails — an already-open listener cannot be reopened.
    pub async fn open(self: &Arc<Self>, timeout: Duration) -> Result<(), RelayError> {
        if self.open_called.swap(true, Ordering::SeqCst) {
            return Err(RelayError::validation("Listener.open() may only be called once", self.tracking.clone()));
        }

        let control = ControlChannel::new(self.endpoint.clone(), Arc::clone(&self.token_provider), self.tracking.clone());
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let acceptor = RendezvousAcceptor::new(self.tracking.clone(), accept_tx);
        if let Some(handler) = self.pending_handler.lock().await.take() {
            acceptor.set_request_handler(handler).await;
        }

        let messages = match tokio::time::timeout(timeout, control.open()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RelayError::new(RelayErrorKind::RelayGeneric, "open timed out before the control channel connected", self.tracking.clone()));
            }
        };

        *self.control.lock().await = Some(control);
        *self.acceptor.lock().await = Some(Arc::clone(&acceptor));
        *self.accept_rx.lock().await = Some(accept_rx);
        *self.dispatch_task.lock().await = Some(self.spawn_dispatch(acceptor, messages));
        Ok(())
    }

    fn spawn_dispatch(self: &Arc<Self>, acceptor: Arc<RendezvousAcceptor>, mut messages: mpsc::UnboundedReceiver<ControlMessage>) -> JoinHandle<()> {
        let tracking = self.tracking.clone();
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                match message {
                    ControlMessage::Accept(payload) => {
                        let acceptor = Arc::clone(&acceptor);
                        tokio::spawn(async move { acceptor.handle_accept(payload).await });
                    }
                    other => {
                        log::debug!("{tracking}: ignoring non-accept message on the listener dispatch loop: {other:?}");
                    }
                }
            }
        })
    }

    /// Returns the next accepted raw stream, or `None` once the listener is
    /// closed and the accept-queue has drained.
    pub async fn accept_next_stream(&self) -> Result<Option<AcceptedStream>, RelayError> {
        let mut guard = self.accept_rx.lock().await;
        let rx = guard
            .as_mut()
            .ok_or_else(|| RelayError::validation("Listener is not open", self.tracking.clone()))?;

        let mut closed = self.closed_watch.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }
        tokio::select! {
            item = rx.recv() => Ok(item),
            _ = closed.changed() => Ok(None),
        }
    }

    /// Subscribes to connecting/online/offline transitions. Fails if the
    /// listener has not been opened yet.
    pub async fn status(&self) -> Result<watch::Receiver<RelayStatus>, RelayError> {
        self.control
            .lock()
            .await
            .as_ref()
            .map(|control| control.status())
            .ok_or_else(|| RelayError::validation("Listener is not open", self.tracking.clone()))
    }

    /// Closes the listener. Idempotent. Releases every caller parked in
    /// [`Self::accept_next_stream`] with `Ok(None)`.
    pub async fn close(&self, timeout: Duration) -> Result<(), RelayError> {
        if self.close_called.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(acceptor) = self.acceptor.lock().await.as_ref() {
            acceptor.close();
        }
        if let Some(control) = self.control.lock().await.take() {
            let _ = tokio::time::timeout(timeout, control.close()).await;
        }
        if let Some(handle) = self.dispatch_task.lock().await.take() {
            handle.abort();
        }
        let _ = self.closed_watch.send(true);
        Ok(())
    }
}
