//! Correlation identifiers carried alongside every listener and rendezvous.

use chrono::Utc;
use uuid::Uuid;

/// Identifies a single listener or rendezvous for server-side log correlation.
///
/// A `TrackingContext` is created once per listener and once per rendezvous;
/// it is never shared across two distinct rendezvous (each `Accept` message
/// gets its own). The id is normally a locally generated UUID, but the relay
/// may return an enriched id on successful connect, in which case
/// [`TrackingContext::replace_id`] swaps it in.
#[derive(Debug, Clone)]
pub struct TrackingContext {
    tracking_id: String,
    subsystem_id: String,
    cached: String,
}

impl TrackingContext {
    /// Creates a context with a fresh random tracking id.
    pub fn new(subsystem_id: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), subsystem_id)
    }

    /// Creates a context with a caller-supplied tracking id, e.g. one carried
    /// in an inbound `accept` control message.
    pub fn with_id(tracking_id: impl Into<String>, subsystem_id: impl Into<String>) -> Self {
        let tracking_id = tracking_id.into();
        let subsystem_id = subsystem_id.into();
        let cached = format!("{subsystem_id}:{tracking_id}");
        Self {
            tracking_id,
            subsystem_id,
            cached,
        }
    }

    /// The tracking id, as currently in effect.
    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    /// The subsystem path this context belongs to.
    pub fn subsystem_id(&self) -> &str {
        &self.subsystem_id
    }

    /// Replaces the tracking id with a service-enriched variant, e.g. after
    /// the control channel's first successful connect. This is the only
    /// mutation a `TrackingContext` ever undergoes.
    pub fn replace_id(&mut self, new_id: impl Into<String>) {
        self.tracking_id = new_id.into();
        self.cached = format!("{}:{}", self.subsystem_id, self.tracking_id);
    }

    /// Renders the `TrackingId:..., SubsystemId:..., Timestamp:...` line used
    /// in error details and close reasons, stamped with the current time.
    pub fn header_line(&self) -> String {
        format!(
            "TrackingId:{}, SubsystemId:{}, Timestamp:{}",
            self.tracking_id,
            self.subsystem_id,
            Utc::now().to_rfc3339(),
        )
    }
}

impl std::fmt::Display for TrackingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.cached)
    }
}
