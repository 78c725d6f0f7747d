//! The listen-mode control WebSocket: envelope format and the reconnecting channel.

mod channel;
mod message;

pub use channel::ControlChannel;
pub use message::{
    AcceptPayload, ControlMessage, HeaderPair, InjectFaultPayload, RenewTokenPayload, RequestInfo,
    RequestPayload, ResponsePayload,
};
