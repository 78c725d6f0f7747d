//! Minting bearer credentials: SAS-key signing, pre-signed pass-through, or a
//! seam for managed-identity acquisition.

use super::security_token::SecurityToken;
use crate::error::{RelayError, RelayErrorKind};
use crate::tracking::TrackingContext;
use crate::uri::{normalize_audience, url_encode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// A managed-identity credential source, injected by the caller.
///
/// Concrete managed-identity acquisition is an external collaborator out of
/// this crate's scope; this crate only defines the seam.
pub trait ManagedIdentityCredential: Send + Sync + fmt::Debug {
    /// Mints a token valid for `audience` for at most `valid_for`.
    fn get_token(
        &self,
        audience: &str,
        valid_for: Duration,
        tracking: &TrackingContext,
    ) -> Result<SecurityToken, RelayError>;
}

/// Placeholder [`ManagedIdentityCredential`] for callers who have not wired
/// one up; always fails validation rather than silently minting a token.
#[derive(Debug, Default)]
pub struct UnconfiguredManagedIdentity;

impl ManagedIdentityCredential for UnconfiguredManagedIdentity {
    fn get_token(
        &self,
        _audience: &str,
        _valid_for: Duration,
        tracking: &TrackingContext,
    ) -> Result<SecurityToken, RelayError> {
        Err(RelayError::new(
            RelayErrorKind::Validation,
            "managed-identity credential acquisition is not configured; inject a ManagedIdentityCredential",
            tracking.clone(),
        ))
    }
}

/// The credential backing a [`TokenProvider`] — a sum type, not inheritance.
enum Credential {
    SasKey { key_name: String, key: String },
    SasToken(String),
    ManagedIdentity(Arc<dyn ManagedIdentityCredential>),
}

/// Mints short-lived bearer credentials for the relay's `ServiceBusAuthorization` header.
pub struct TokenProvider {
    credential: Credential,
}

impl TokenProvider {
    /// SAS-key variant: signs on demand with HMAC-SHA256.
    ///
    /// `key_name` and `key` must each be 1..=256 characters.
    pub fn from_sas_key(key_name: impl Into<String>, key: impl Into<String>) -> Result<Self, RelayError> {
        let key_name = key_name.into();
        let key = key.into();
        let tracking = TrackingContext::new("/token-provider");
        if !(1..=256).contains(&key_name.len()) {
            return Err(RelayError::validation(
                "SharedAccessKeyName must be 1..256 characters",
                tracking,
            ));
        }
        if !(1..=256).contains(&key.len()) {
            return Err(RelayError::validation(
                "SharedAccessKey must be 1..256 characters",
                tracking,
            ));
        }
        Ok(Self {
            credential: Credential::SasKey { key_name, key },
        })
    }

    /// Pre-signed variant: returns the given string verbatim.
    pub fn from_sas_token(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::SasToken(token.into()),
        }
    }

    /// Managed-identity variant, delegating to an injected credential source.
    pub fn from_managed_identity(credential: Arc<dyn ManagedIdentityCredential>) -> Self {
        Self {
            credential: Credential::ManagedIdentity(credential),
        }
    }

    /// Mints (or replays) a token valid for `audience`, for at most `valid_for`.
    pub fn get_token(&self, audience: &str, valid_for: Duration) -> Result<SecurityToken, RelayError> {
        let tracking = TrackingContext::new("/token-provider");
        if audience.trim().is_empty() {
            return Err(RelayError::validation("audience must not be empty", tracking));
        }
        match &self.credential {
            Credential::SasKey { key_name, key } => {
                sign_sas_token(key_name, key, audience, valid_for, &tracking)
            }
            Credential::SasToken(token) => SecurityToken::parse(token, &tracking),
            Credential::ManagedIdentity(credential) => {
                credential.get_token(audience, valid_for, &tracking)
            }
        }
    }
}

fn sign_sas_token(
    key_name: &str,
    key: &str,
    audience: &str,
    valid_for: Duration,
    tracking: &TrackingContext,
) -> Result<SecurityToken, RelayError> {
    let normalized_audience = normalize_audience(audience, tracking)?;
    let expiry_secs = Utc::now().timestamp() + valid_for.as_secs() as i64;

    let string_to_sign = format!("{}\n{}", url_encode(&normalized_audience), expiry_secs);

    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| {
        RelayError::validation(format!("invalid signing key: {e}"), tracking.clone())
    })?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let token_text = format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
        url_encode(&normalized_audience),
        url_encode(&signature),
        expiry_secs,
        url_encode(key_name),
    );

    let expiry = chrono::DateTime::from_timestamp(expiry_secs, 0)
        .ok_or_else(|| RelayError::validation("computed expiry out of range", tracking.clone()))?;

    Ok(SecurityToken::new(token_text, normalized_audience, expiry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sas_key_rejects_empty_key_name() {
        assert!(TokenProvider::from_sas_key("", "a-key-value").is_err());
    }

    #[test]
    fn sas_key_rejects_oversized_key() {
        let huge = "a".repeat(257);
        assert!(TokenProvider::from_sas_key("name", huge).is_err());
    }

    #[test]
    fn sas_key_mints_token_with_future_expiry() {
        let provider = TokenProvider::from_sas_key("RootManageSharedAccessKey", "super-secret-key").unwrap();
        let token = provider
            .get_token("https://relay.example.com/myendpoint", Duration::from_secs(300))
            .unwrap();
        assert!(token.expiry() > Utc::now());
        assert!(token.token_text().starts_with("SharedAccessSignature sr="));
        assert!(token.token_text().contains("skn=RootManageSharedAccessKey"));
    }

    #[test]
    fn sas_key_round_trips_through_parse() {
        let provider = TokenProvider::from_sas_key("name", "secret-key-value").unwrap();
        let token = provider
            .get_token("https://relay.example.com/ep", Duration::from_secs(120))
            .unwrap();
        let tracking = TrackingContext::new("/test");
        let reparsed = SecurityToken::parse(&token.serialize(), &tracking).unwrap();
        assert_eq!(reparsed.serialize(), token.serialize());
        assert_eq!(reparsed.audience(), token.audience());
    }

    #[test]
    fn pre_signed_variant_returns_verbatim() {
        let raw = "SharedAccessSignature sr=http%3A%2F%2Fhost%2F&sig=x&se=2000000000&skn=k";
        let provider = TokenProvider::from_sas_token(raw);
        let token = provider.get_token("unused-audience", Duration::from_secs(60)).unwrap();
        assert_eq!(token.serialize(), raw);
        assert_eq!(token.audience(), "http://host/");
    }

    #[test]
    fn unconfigured_managed_identity_fails_validation() {
        let provider = TokenProvider::from_managed_identity(Arc::new(UnconfiguredManagedIdentity));
        let err = provider
            .get_token("https://relay.example.com/ep", Duration::from_secs(60))
            .unwrap_err();
        assert_eq!(err.kind, RelayErrorKind::Validation);
    }

    #[test]
    fn empty_audience_is_rejected() {
        let provider = TokenProvider::from_sas_key("name", "key-value").unwrap();
        assert!(provider.get_token("", Duration::from_secs(60)).is_err());
    }
}
