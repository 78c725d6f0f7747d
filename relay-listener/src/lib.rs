//! Client library for a cloud-hosted reverse-tunneling relay.
//!
//! A *listener* process behind a NAT or firewall uses [`Listener`] to
//! register a named endpoint on the relay and service inbound rendezvous
//! requests, either as raw duplex streams or as Hybrid-HTTP request/response
//! exchanges. A *client* process uses [`Client`] to open outbound streams to
//! such an endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod client;
pub mod connection_string;
pub mod control;
pub mod error;
pub mod listener;
pub mod rendezvous;
pub mod status;
pub mod token;
pub mod tracking;
pub mod uri;

pub use client::Client;
pub use connection_string::{AuthenticationKind, ConnectionStringProperties};
pub use error::{RelayError, RelayErrorKind};
pub use listener::Listener;
pub use rendezvous::{AcceptedStream, HttpRequestContext, HttpResponseWriter, RawStream, RequestHandler};
pub use status::RelayStatus;
pub use token::{ManagedIdentityCredential, SecurityToken, TokenProvider, TokenRenewer, TokenRenewerEvent};
pub use tracking::TrackingContext;
pub use uri::EndpointAddress;
