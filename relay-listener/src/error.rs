//! The error taxonomy surfaced by every fallible operation in this crate.

use crate::tracking::TrackingContext;
use thiserror::Error;

/// The kinds of failure a caller of this crate can observe.
///
/// Non-transient kinds mean "stop retrying and surface this"; transient
/// kinds mean "the control channel should reconnect".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorKind {
    /// The relay rejected the supplied token.
    AuthorizationFailed,
    /// The endpoint path does not exist, or is disabled.
    EndpointNotFound,
    /// A listener already holds this endpoint (reserved for future use).
    EndpointAlreadyExists,
    /// Too many listeners, or too much throughput, for this endpoint.
    QuotaExceeded,
    /// The peer or transport dropped; reconnect-eligible.
    ConnectionLost,
    /// Any other transport-level failure.
    RelayGeneric,
    /// A local parameter failed validation before any network call was made.
    Validation,
}

impl RelayErrorKind {
    /// Whether a [`ControlChannel`](crate::control::ControlChannel) should
    /// attempt to reconnect after an error of this kind.
    pub fn is_transient(self) -> bool {
        matches!(self, RelayErrorKind::ConnectionLost | RelayErrorKind::RelayGeneric)
    }
}

/// An error surfaced by this crate, always carrying the tracking context of
/// the listener or rendezvous that produced it.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message} ({tracking})")]
pub struct RelayError {
    /// The error's taxonomy kind.
    pub kind: RelayErrorKind,
    /// A human-readable description. Never contains raw exception text from
    /// application handler code (see `HttpFramer`'s default 500 handling).
    pub message: String,
    /// The tracking context in effect when the error occurred.
    pub tracking: TrackingContext,
}

impl RelayError {
    /// Builds a new error of the given kind.
    pub fn new(
        kind: RelayErrorKind,
        message: impl Into<String>,
        tracking: TrackingContext,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            tracking,
        }
    }

    /// Shorthand for a [`RelayErrorKind::Validation`] error.
    pub fn validation(message: impl Into<String>, tracking: TrackingContext) -> Self {
        Self::new(RelayErrorKind::Validation, message, tracking)
    }

    /// Whether this error is reconnect-eligible.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// The `TrackingId:..., SubsystemId:..., Timestamp:...` correlation line.
    pub fn tracking_header(&self) -> String {
        self.tracking.header_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_exactly_connection_lost_and_relay_generic() {
        let transient = [RelayErrorKind::ConnectionLost, RelayErrorKind::RelayGeneric];
        let non_transient = [
            RelayErrorKind::AuthorizationFailed,
            RelayErrorKind::EndpointNotFound,
            RelayErrorKind::EndpointAlreadyExists,
            RelayErrorKind::QuotaExceeded,
            RelayErrorKind::Validation,
        ];
        for kind in transient {
            assert!(kind.is_transient());
        }
        for kind in non_transient {
            assert!(!kind.is_transient());
        }
    }

    #[test]
    fn display_includes_tracking_context() {
        let err = RelayError::new(
            RelayErrorKind::AuthorizationFailed,
            "token rejected",
            TrackingContext::with_id("id-1", "/listener"),
        );
        let rendered = err.to_string();
        assert!(rendered.contains("AuthorizationFailed"));
        assert!(rendered.contains("token rejected"));
        assert!(rendered.contains("/listener:id-1"));
    }
}
