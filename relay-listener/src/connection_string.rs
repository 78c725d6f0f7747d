//! The relay connection-string key/value surface.

use crate::error::{RelayError, RelayErrorKind};
use crate::token::{ManagedIdentityCredential, TokenProvider, UnconfiguredManagedIdentity};
use crate::tracking::TrackingContext;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The `Authentication=` value, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationKind {
    /// `Authentication=Managed Identity` or `Authentication=ManagedIdentity`.
    ManagedIdentity,
    /// Any other value, preserved verbatim.
    Other(String),
    /// The key was absent.
    Unspecified,
}

/// The parsed key/value surface of a relay connection string.
///
/// Parsing alone never rejects a connection string for carrying more than
/// one credential kind — see [`ConnectionStringProperties::validate_single_credential`].
/// A conflicting combination parses successfully and is only rejected once a
/// credential is actually assembled, matching the source relay SDK's behavior.
#[derive(Debug, Clone)]
pub struct ConnectionStringProperties {
    /// The `sb://` (or `wss://`/`https://`) base endpoint.
    pub endpoint: Url,
    /// The single-segment entity path.
    pub entity_path: String,
    /// `SharedAccessKeyName`, half of the SAS-key credential.
    pub shared_access_key_name: Option<String>,
    /// `SharedAccessKey`, half of the SAS-key credential.
    pub shared_access_key: Option<String>,
    /// A pre-signed `SharedAccessSignature` string.
    pub shared_access_signature: Option<String>,
    /// `OperationTimeout`, if present.
    pub operation_timeout: Option<Duration>,
    /// `Authentication=`, if present.
    pub authentication: AuthenticationKind,
}

impl ConnectionStringProperties {
    /// Parses `key=value` pairs separated by `;`.
    pub fn parse(connection_string: &str) -> Result<Self, RelayError> {
        let tracking = TrackingContext::new("/connection-string");
        let mut fields: HashMap<String, String> = HashMap::new();
        for segment in connection_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                RelayError::validation(
                    format!("malformed connection string segment: {segment}"),
                    tracking.clone(),
                )
            })?;
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }

        let endpoint_raw = fields
            .get("Endpoint")
            .ok_or_else(|| RelayError::validation("connection string is missing Endpoint", tracking.clone()))?;
        let endpoint = Url::parse(endpoint_raw).map_err(|e| {
            RelayError::validation(format!("invalid Endpoint: {e}"), tracking.clone())
        })?;

        let entity_path = fields.get("EntityPath").cloned().unwrap_or_default();

        let operation_timeout = fields
            .get("OperationTimeout")
            .map(|v| parse_timespan(v, &tracking))
            .transpose()?;

        let authentication = match fields.get("Authentication").map(String::as_str) {
            Some("ManagedIdentity") | Some("Managed Identity") => AuthenticationKind::ManagedIdentity,
            Some(other) => AuthenticationKind::Other(other.to_string()),
            None => AuthenticationKind::Unspecified,
        };

        Ok(Self {
            endpoint,
            entity_path,
            shared_access_key_name: fields.get("SharedAccessKeyName").cloned(),
            shared_access_key: fields.get("SharedAccessKey").cloned(),
            shared_access_signature: fields.get("SharedAccessSignature").cloned(),
            operation_timeout,
            authentication,
        })
    }

    fn credential_flags(&self) -> [bool; 3] {
        let sas_key = self.shared_access_key_name.is_some() && self.shared_access_key.is_some();
        let sas_signature = self.shared_access_signature.is_some();
        let managed_identity = self.authentication == AuthenticationKind::ManagedIdentity;
        [sas_key, sas_signature, managed_identity]
    }

    /// Rejects a connection string that specifies more than one credential
    /// kind. Not applied by [`Self::parse`] itself.
    pub fn validate_single_credential(&self, tracking: &TrackingContext) -> Result<(), RelayError> {
        let count = self.credential_flags().iter().filter(|present| **present).count();
        if count > 1 {
            return Err(RelayError::new(
                RelayErrorKind::Validation,
                "connection string specifies more than one credential (SAS key, SAS signature, managed identity are mutually exclusive)",
                tracking.clone(),
            ));
        }
        Ok(())
    }

    /// Builds the single [`TokenProvider`] this connection string specifies,
    /// applying the mutual-exclusion check first.
    pub fn to_token_provider(&self, tracking: &TrackingContext) -> Result<TokenProvider, RelayError> {
        self.validate_single_credential(tracking)?;
        if let (Some(name), Some(key)) = (&self.shared_access_key_name, &self.shared_access_key) {
            return TokenProvider::from_sas_key(name.clone(), key.clone());
        }
        if let Some(signature) = &self.shared_access_signature {
            return Ok(TokenProvider::from_sas_token(signature.clone()));
        }
        if self.authentication == AuthenticationKind::ManagedIdentity {
            let credential: Arc<dyn ManagedIdentityCredential> = Arc::new(UnconfiguredManagedIdentity);
            return Ok(TokenProvider::from_managed_identity(credential));
        }
        Err(RelayError::new(
            RelayErrorKind::Validation,
            "connection string specifies no credential",
            tracking.clone(),
        ))
    }
}

/// Parses a `.NET`-style `HH:MM:SS` timespan, or a bare integer number of seconds.
fn parse_timespan(value: &str, tracking: &TrackingContext) -> Result<Duration, RelayError> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return Err(RelayError::validation(
            format!("invalid OperationTimeout: {value}"),
            tracking.clone(),
        ));
    }
    let hours: u64 = parts[0]
        .parse()
        .map_err(|_| RelayError::validation(format!("invalid OperationTimeout: {value}"), tracking.clone()))?;
    let minutes: u64 = parts[1]
        .parse()
        .map_err(|_| RelayError::validation(format!("invalid OperationTimeout: {value}"), tracking.clone()))?;
    let seconds: u64 = parts[2]
        .parse()
        .map_err(|_| RelayError::validation(format!("invalid OperationTimeout: {value}"), tracking.clone()))?;
    Ok(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sas_key_connection_string() {
        let cs = "Endpoint=sb://relay.example.com/;EntityPath=myendpoint;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=abc123";
        let parsed = ConnectionStringProperties::parse(cs).unwrap();
        assert_eq!(parsed.entity_path, "myendpoint");
        assert_eq!(parsed.shared_access_key_name.as_deref(), Some("RootManageSharedAccessKey"));
        assert_eq!(parsed.shared_access_key.as_deref(), Some("abc123"));
    }

    #[test]
    fn parses_operation_timeout_as_timespan() {
        let cs = "Endpoint=sb://relay.example.com/;OperationTimeout=00:01:30";
        let parsed = ConnectionStringProperties::parse(cs).unwrap();
        assert_eq!(parsed.operation_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn parse_accepts_conflicting_credentials_but_validate_rejects_them() {
        let cs = "Endpoint=sb://relay.example.com/;SharedAccessKeyName=n;SharedAccessKey=k;SharedAccessSignature=sig";
        let parsed = ConnectionStringProperties::parse(cs).unwrap();
        assert!(parsed.shared_access_signature.is_some());
        let tracking = TrackingContext::new("/test");
        assert!(parsed.validate_single_credential(&tracking).is_err());
        assert!(parsed.to_token_provider(&tracking).is_err());
    }

    #[test]
    fn managed_identity_plus_signature_parses_but_fails_validation() {
        let cs = "Endpoint=sb://relay.example.com/;Authentication=ManagedIdentity;SharedAccessSignature=sig";
        let parsed = ConnectionStringProperties::parse(cs).unwrap();
        assert_eq!(parsed.authentication, AuthenticationKind::ManagedIdentity);
        let tracking = TrackingContext::new("/test");
        assert!(parsed.validate_single_credential(&tracking).is_err());
    }

    #[test]
    fn single_credential_builds_token_provider() {
        let cs = "Endpoint=sb://relay.example.com/;SharedAccessKeyName=n;SharedAccessKey=k";
        let parsed = ConnectionStringProperties::parse(cs).unwrap();
        let tracking = TrackingContext::new("/test");
        assert!(parsed.to_token_provider(&tracking).is_ok());
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        assert!(ConnectionStringProperties::parse("EntityPath=foo").is_err());
    }
}
