//! The JSON control envelope exchanged over the listen-mode WebSocket.

use serde::{Deserialize, Serialize};

/// One name/value header pair, preserving multiplicity and order.
pub type HeaderPair = (String, String);

/// Metadata describing an HTTP-mode rendezvous, carried alongside an
/// [`ControlMessage::Accept`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub target: String,
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
}

/// The `accept` control-message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptPayload {
    pub id: String,
    pub address: String,
    #[serde(rename = "connectHeaders", default, skip_serializing_if = "Option::is_none")]
    pub connect_headers: Option<Vec<HeaderPair>>,
    #[serde(rename = "requestInfo", default, skip_serializing_if = "Option::is_none")]
    pub request_info: Option<RequestInfo>,
}

/// The `renewToken` control-message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewTokenPayload {
    pub token: String,
}

/// The HTTP-mode `request` envelope, framed first on a rendezvous socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    pub id: String,
    pub method: String,
    pub target: String,
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
    pub body: bool,
}

/// The HTTP-mode `response` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
    pub body: bool,
}

/// A test hook accepted (and echoed) by the relay; never emitted by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectFaultPayload {
    #[serde(rename = "delayMs", default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// A control-channel envelope: a JSON object carrying exactly one of the
/// known top-level keys. Externally tagged by `serde`'s default enum
/// representation, which happens to produce exactly this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlMessage {
    Accept(AcceptPayload),
    RenewToken(RenewTokenPayload),
    Request(RequestPayload),
    Response(ResponsePayload),
    InjectFault(InjectFaultPayload),
}

impl ControlMessage {
    /// Parses a single control-channel text/binary frame payload.
    ///
    /// An envelope carrying none of the known discriminants is reported as
    /// `Ok(None)` so the caller can log-and-drop it, matching the relay's
    /// documented handling of unrecognized control messages.
    pub fn parse(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        match serde_json::from_str::<Self>(raw) {
            Ok(message) => Ok(Some(message)),
            Err(e) if e.is_data() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
