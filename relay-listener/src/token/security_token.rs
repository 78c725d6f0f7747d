//! Parsing and representation of minted or pre-signed SAS tokens.

use crate::error::{RelayError, RelayErrorKind};
use crate::tracking::TrackingContext;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;

/// An opaque bearer credential with an audience and an expiry.
///
/// Produced either by [`super::provider::TokenProvider`] or parsed back out
/// of a token string received from elsewhere.
#[derive(Debug, Clone)]
pub struct SecurityToken {
    token_text: String,
    audience: String,
    expiry: DateTime<Utc>,
}

impl PartialEq for SecurityToken {
    fn eq(&self, other: &Self) -> bool {
        self.token_text == other.token_text
    }
}

impl SecurityToken {
    /// Builds a token from its already-assembled parts.
    pub fn new(token_text: impl Into<String>, audience: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            token_text: token_text.into(),
            audience: audience.into(),
            expiry,
        }
    }

    /// The opaque token text, suitable for the `ServiceBusAuthorization` header.
    pub fn token_text(&self) -> &str {
        &self.token_text
    }

    /// The audience this token is valid for.
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// The token's expiry, in UTC.
    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// Whether `now >= expiry`.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry
    }

    /// Returns the opaque token text — the inverse of [`SecurityToken::parse`].
    pub fn serialize(&self) -> String {
        self.token_text.clone()
    }

    /// Parses a `key=value` pair list joined by `&`, with URL-decoded values.
    /// Accepts either the long-form (`Audience`, `ExpiresOn`) or wire-form
    /// (`sr`, `se`) field names; either spelling must carry an
    /// expiry expressed in seconds since the Unix epoch.
    pub fn parse(token_text: &str, tracking: &TrackingContext) -> Result<Self, RelayError> {
        let body = token_text
            .strip_prefix("SharedAccessSignature ")
            .unwrap_or(token_text);

        let mut audience: Option<String> = None;
        let mut expiry_secs: Option<i64> = None;

        for pair in body.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let decoded = percent_decode_str(value)
                .decode_utf8()
                .map_err(|e| {
                    RelayError::validation(format!("invalid token field encoding: {e}"), tracking.clone())
                })?
                .into_owned();
            match key {
                "Audience" | "sr" => audience = Some(decoded),
                "ExpiresOn" | "se" => {
                    expiry_secs = Some(decoded.parse::<i64>().map_err(|e| {
                        RelayError::validation(format!("invalid expiry field: {e}"), tracking.clone())
                    })?);
                }
                _ => {}
            }
        }

        let audience = audience.ok_or_else(|| {
            RelayError::new(
                RelayErrorKind::Validation,
                "token is missing a mandatory Audience/sr field",
                tracking.clone(),
            )
        })?;
        let expiry_secs = expiry_secs.ok_or_else(|| {
            RelayError::new(
                RelayErrorKind::Validation,
                "token is missing a mandatory ExpiresOn/se field",
                tracking.clone(),
            )
        })?;
        let expiry = DateTime::from_timestamp(expiry_secs, 0).ok_or_else(|| {
            RelayError::validation("token expiry is out of range", tracking.clone())
        })?;

        Ok(Self {
            token_text: token_text.to_string(),
            audience,
            expiry,
        })
    }
}
