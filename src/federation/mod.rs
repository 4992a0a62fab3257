//! External identity federation.
//!
//! A [`ProviderAdapter`] knows how to talk to one identity provider; the
//! [`FederationCoordinator`] drives the handshake against an adapter and merges
//! the resulting claims into the caller's principal.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Claim;

pub mod coordinator;
mod error;
pub mod oauth1;
pub mod oauth2;
pub mod provider;

pub use coordinator::{FederationCoordinator, HandshakeState};
pub use error::{FederationError, ProviderExchangeError};

/// Where to send the user agent to start a sign-in.
#[derive(Clone, Debug, PartialEq)]
pub struct Challenge {
    pub redirect_uri: String,
    /// OAuth1 request token, echoed back by the provider at callback time.
    pub request_token: Option<String>,
    /// OAuth1 request token secret, needed again at callback time.
    pub request_token_secret: Option<String>,
}

/// Query parameters a provider sends back to the callback endpoint.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CallbackPayload {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub oauth_token: Option<String>,
    pub oauth_verifier: Option<String>,
    pub denied: Option<String>,
}

impl CallbackPayload {
    /// The reason given when the provider, or the user, refused the sign-in.
    pub fn rejection(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(match &self.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            });
        }
        self.denied
            .as_ref()
            .map(|_| "access_denied: user declined the request token".to_string())
    }
}

/// The only handshake state that survives the redirect to the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandshakeCorrelation {
    pub provider: String,
    pub return_url: String,
    pub state: String,
    /// Also handed to the user agent that started the handshake, which must
    /// present it again on the callback.
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_token_secret: Option<String>,
}

/// Provider-agnostic outcome of a successful exchange.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalProfile {
    pub access_token: String,
    pub access_token_secret: Option<String>,
    pub fields: Map<String, Value>,
}

impl ExternalProfile {
    /// The named field as a string; empty when absent or null.
    pub fn field(&self, name: &str) -> String {
        match self.fields.get(name) {
            Some(Value::String(value)) => value.clone(),
            Some(Value::Null) | None => String::new(),
            Some(value) => value.to_string(),
        }
    }

    /// The first non-empty field among `names`.
    pub fn first_field(&self, names: &[&str]) -> String {
        names
            .iter()
            .map(|name| self.field(name))
            .find(|value| !value.is_empty())
            .unwrap_or_default()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Scheme name recorded on the identities this provider authenticates.
    fn name(&self) -> &'static str;

    /// Path segment of the provider's challenge and callback endpoints.
    fn slug(&self) -> &'static str;

    /// Every claim type `map_claims` emits, in emission order.
    fn declared_claim_types(&self) -> &'static [&'static str];

    async fn challenge(
        &self,
        client: &Client,
        callback_url: &str,
        state: &str,
    ) -> Result<Challenge, ProviderExchangeError>;

    async fn callback(
        &self,
        client: &Client,
        callback_url: &str,
        payload: &CallbackPayload,
        correlation: &HandshakeCorrelation,
    ) -> Result<ExternalProfile, ProviderExchangeError>;

    fn map_claims(&self, profile: &ExternalProfile) -> Vec<Claim>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_profile_field() {
        let profile = ExternalProfile {
            access_token: "token".to_string(),
            access_token_secret: None,
            fields: json!({"id": 42, "name": "Ann", "email": null})
                .as_object()
                .cloned()
                .unwrap(),
        };

        assert_eq!(profile.field("id"), "42");
        assert_eq!(profile.field("name"), "Ann");
        assert_eq!(profile.field("email"), "");
        assert_eq!(profile.field("missing"), "");
        assert_eq!(profile.first_field(&["email", "name"]), "Ann");
    }

    #[test]
    fn test_callback_rejection() {
        let payload: CallbackPayload =
            serde_urlencoded::from_str("error=access_denied&error_description=User+cancelled")
                .unwrap();
        assert_eq!(
            payload.rejection(),
            Some("access_denied: User cancelled".to_string())
        );

        let payload: CallbackPayload = serde_urlencoded::from_str("denied=abc").unwrap();
        assert!(payload.rejection().is_some());

        let payload: CallbackPayload = serde_urlencoded::from_str("code=xyz&state=s").unwrap();
        assert_eq!(payload.rejection(), None);
        assert_eq!(payload.code.as_deref(), Some("xyz"));
    }
}
