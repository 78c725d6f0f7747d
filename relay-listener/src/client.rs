//! The outbound-connect façade: dial a registered endpoint as a client.

use crate::error::{RelayError, RelayErrorKind};
use crate::rendezvous::RawStream;
use crate::tracking::TrackingContext;
use crate::uri::EndpointAddress;
use std::time::Duration;
use tokio_tungstenite::connect_async;

/// Opens outbound streams to a listener's endpoint.
pub struct Client {
    endpoint: EndpointAddress,
    token: Option<String>,
    tracking: TrackingContext,
}

impl Client {
    /// Builds a client for `endpoint`. `token` is required unless the
    /// endpoint was registered as unauthenticated-client.
    pub fn new(endpoint: EndpointAddress, token: Option<String>) -> Self {
        let tracking = TrackingContext::new(format!("/client/{}", endpoint.path()));
        Self { endpoint, token, tracking }
    }

    /// Opens a connect-action rendezvous WebSocket and returns the stream.
    /// A non-101 response is mapped to a typed [`RelayError`] carrying the
    /// response details for diagnostics.
    pub async fn create_connection(&self, timeout: Duration) -> Result<RawStream, RelayError> {
        let uri = self.endpoint.connect_uri(self.token.as_deref());
        let connect = connect_async(uri.as_str());

        let (socket, response) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| RelayError::new(RelayErrorKind::ConnectionLost, "connect timed out", self.tracking.clone()))?
            .map_err(|e| self.classify(e))?;

        if response.status().as_u16() != 101 {
            return Err(RelayError::new(
                RelayErrorKind::RelayGeneric,
                format!("expected HTTP 101 Switching Protocols, got {}", response.status()),
                self.tracking.clone(),
            ));
        }
        Ok(socket)
    }

    fn classify(&self, err: tokio_tungstenite::tungstenite::Error) -> RelayError {
        use tokio_tungstenite::tungstenite::Error;
        let kind = match &err {
            Error::Http(response) => match response.status().as_u16() {
                401 | 403 => RelayErrorKind::AuthorizationFailed,
                404 => RelayErrorKind::EndpointNotFound,
                429 => RelayErrorKind::QuotaExceeded,
                _ => RelayErrorKind::RelayGeneric,
            },
            _ => RelayErrorKind::RelayGeneric,
        };
        RelayError::new(kind, format!("connect failed: {err}"), self.tracking.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_unreachable_host_is_a_relay_error() {
        let client = Client::new(EndpointAddress::with_port("127.0.0.1", "ep", 1), Some("tok".to_string()));
        let err = client.create_connection(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err.kind, RelayErrorKind::RelayGeneric | RelayErrorKind::ConnectionLost));
    }
}
