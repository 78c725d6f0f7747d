//! Endpoint addressing and the relay's query-string wire protocol.
//!
//! The user-facing address is `sb://{host}/{path}`, a single path segment
//! with no query and no port; all the wire URIs (`listen`, `connect`,
//! HTTP-mode entry) are derived from it.

use crate::error::{RelayError, RelayErrorKind};
use crate::tracking::TrackingContext;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

/// Default TLS port for the relay's WSS/HTTPS surface.
pub const DEFAULT_PORT: u16 = 443;

const QUERY_FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'%')
    .add(b'&')
    .add(b'=')
    .add(b'+')
    .add(b'/');

/// Percent-encodes a value for safe insertion into a query-string component.
pub fn url_encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_FRAGMENT).to_string()
}

/// A logical `sb://host/path` endpoint: a single path segment, no query, no port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    host: String,
    path: String,
    port: u16,
    tls: bool,
}

impl EndpointAddress {
    /// Builds an address using the default relay TLS port.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_port(host, path, DEFAULT_PORT)
    }

    /// Builds an address pinned to a specific port (used in tests against a
    /// local fake relay, where 443 is not available).
    pub fn with_port(host: impl Into<String>, path: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            path: path.into().trim_matches('/').to_string(),
            port,
            tls: true,
        }
    }

    /// Builds a plaintext (`ws://`/`http://`) address, for dialing an
    /// in-process fake relay in tests where a TLS handshake isn't available.
    pub fn insecure(host: impl Into<String>, path: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            path: path.into().trim_matches('/').to_string(),
            port,
            tls: false,
        }
    }

    /// The relay host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The single path segment identifying this endpoint.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The TLS port in effect.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn ws_scheme(&self) -> &'static str {
        if self.tls {
            "wss"
        } else {
            "ws"
        }
    }

    fn http_scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// The canonical `sb://host/path` form used in logs and error messages.
    pub fn to_sb_uri(&self) -> String {
        format!("sb://{}/{}", self.host, self.path)
    }

    /// Builds the listen-mode control WebSocket URI:
    /// `wss://{host}:{port}/$hc/{path}?sb-hc-action=listen&sb-hc-id={id}`.
    pub fn listen_uri(&self, tracking_id: &str) -> Url {
        let raw = format!(
            "{}://{}:{}/$hc/{}?sb-hc-action=listen&sb-hc-id={}",
            self.ws_scheme(),
            self.host,
            self.port,
            self.path,
            url_encode(tracking_id),
        );
        Url::parse(&raw).expect("listen_uri components are pre-validated")
    }

    /// Builds the client connect WebSocket URI:
    /// `wss://{host}:{port}/$hc/{path}?sb-hc-action=connect[&sb-hc-token=...]`.
    pub fn connect_uri(&self, token: Option<&str>) -> Url {
        let mut raw = format!(
            "{}://{}:{}/$hc/{}?sb-hc-action=connect",
            self.ws_scheme(),
            self.host,
            self.port,
            self.path,
        );
        if let Some(token) = token {
            raw.push_str("&sb-hc-token=");
            raw.push_str(&url_encode(token));
        }
        Url::parse(&raw).expect("connect_uri components are pre-validated")
    }

    /// Builds the HTTP-mode client entry URI: `https://{host}:{port}/{path}`.
    pub fn https_uri(&self) -> Url {
        let raw = format!("{}://{}:{}/{}", self.http_scheme(), self.host, self.port, self.path);
        Url::parse(&raw).expect("https_uri components are pre-validated")
    }
}

/// Normalizes a token audience to its canonical form: http scheme, no query,
/// trailing slash, default port elided. Used both when minting a SAS token
/// and when validating one the caller already holds.
pub fn normalize_audience(audience: &str, tracking: &TrackingContext) -> Result<String, RelayError> {
    if audience.trim().is_empty() {
        return Err(RelayError::validation(
            "audience must not be empty",
            tracking.clone(),
        ));
    }
    let mut url = Url::parse(audience)
        .or_else(|_| Url::parse(&format!("http://{audience}")))
        .map_err(|e| {
            RelayError::validation(format!("invalid audience URI: {e}"), tracking.clone())
        })?;

    url.set_query(None);
    url.set_fragment(None);
    let _ = url.set_scheme("http");

    let default_port_for_scheme = match url.scheme() {
        "https" => Some(443),
        _ => Some(80),
    };
    if url.port() == default_port_for_scheme {
        let _ = url.set_port(None);
    }

    let mut normalized = url.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}
