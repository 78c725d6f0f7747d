//! Scheduling periodic token refresh for a long-lived consumer.

use super::provider::TokenProvider;
use super::security_token::SecurityToken;
use crate::error::RelayError;
use crate::tracking::TrackingContext;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The renewer never schedules a refresh earlier than this, even if the
/// minted token is longer-lived.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Events raised by a [`TokenRenewer`] as it mints and re-mints tokens.
#[derive(Debug, Clone)]
pub enum TokenRenewerEvent {
    /// A token was successfully (re-)minted.
    Renewed(SecurityToken),
    /// A scheduled renewal failed. Non-fatal: the renewer keeps retrying.
    RenewError(RelayError),
}

/// Binds a [`TokenProvider`] to a fixed `{audience, valid_for}` pair and
/// refreshes the resulting token on a timer, broadcasting every outcome.
pub struct TokenRenewer {
    provider: Arc<TokenProvider>,
    audience: String,
    valid_for: Duration,
    owner: TrackingContext,
    events: broadcast::Sender<TokenRenewerEvent>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TokenRenewer {
    /// Binds a renewer to `provider`/`audience`/`valid_for` under the given
    /// owner's tracking context (a narrow owner handle, not the full listener,
    /// to avoid holding the listener alive from inside its own timer task).
    pub fn new(
        provider: Arc<TokenProvider>,
        audience: impl Into<String>,
        valid_for: Duration,
        owner: TrackingContext,
    ) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(32);
        Arc::new(Self {
            provider,
            audience: audience.into(),
            valid_for,
            owner,
            events,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Subscribes to renewal events. May be called any number of times.
    pub fn subscribe(&self) -> broadcast::Receiver<TokenRenewerEvent> {
        self.events.subscribe()
    }

    /// Fetches the first token, raises a `Renewed` event, and arms the
    /// recurring refresh timer. Calling this more than once on the same
    /// renewer restarts the timer from the newly fetched token's expiry.
    pub async fn start(self: &Arc<Self>) -> Result<SecurityToken, RelayError> {
        let token = self.fetch_and_emit().await?;
        self.spawn_loop(token.expiry());
        Ok(token)
    }

    /// Cancels the recurring timer. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().expect("renewer lock poisoned").take() {
            handle.abort();
        }
    }

    async fn fetch_and_emit(&self) -> Result<SecurityToken, RelayError> {
        match self.provider.get_token(&self.audience, self.valid_for) {
            Ok(token) => {
                log::debug!(
                    "{}: token renewed, expires {}",
                    self.owner.subsystem_id(),
                    token.expiry()
                );
                let _ = self.events.send(TokenRenewerEvent::Renewed(token.clone()));
                Ok(token)
            }
            Err(err) => {
                log::warn!("{}: token renewal failed: {}", self.owner.subsystem_id(), err);
                let _ = self.events.send(TokenRenewerEvent::RenewError(err.clone()));
                Err(err)
            }
        }
    }

    fn spawn_loop(self: &Arc<Self>, first_expiry: DateTime<Utc>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut next_expiry = first_expiry;
            loop {
                let sleep_for = refresh_interval(next_expiry);
                tokio::select! {
                    _ = this.cancel.cancelled() => return,
                    _ = tokio::time::sleep(sleep_for) => {}
                }
                match this.fetch_and_emit().await {
                    Ok(token) => next_expiry = token.expiry(),
                    Err(_) => next_expiry = Utc::now() + chrono::Duration::from_std(MIN_REFRESH_INTERVAL).unwrap(),
                }
            }
        });
        *self.handle.lock().expect("renewer lock poisoned") = Some(handle);
    }
}

/// `interval = max(expiry - now, MIN_REFRESH_INTERVAL)`.
fn refresh_interval(expiry: DateTime<Utc>) -> Duration {
    let until_expiry = (expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    until_expiry.max(MIN_REFRESH_INTERVAL)
}

impl Drop for TokenRenewer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
