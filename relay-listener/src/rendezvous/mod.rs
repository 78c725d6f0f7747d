//! Rendezvous dialing and the raw-stream / Hybrid-HTTP dispatch split.

mod acceptor;
mod http_framer;

pub use acceptor::{AcceptedStream, RawStream, RendezvousAcceptor, RequestHandler, DEFAULT_ARP_PAUSE, DEFAULT_DIAL_BUDGET};
pub use http_framer::{decode_body_frame, encode_body_chunk, BodyFrame, HttpRequestContext, HttpResponseWriter};
