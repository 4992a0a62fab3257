use async_trait::async_trait;
use reqwest::Client;

use crate::configuration::ConfigStore;
use crate::federation::oauth2::{self, Credentials, Endpoints};
use crate::federation::provider::oauth2_settings;
use crate::federation::{
    CallbackPayload, Challenge, ExternalProfile, HandshakeCorrelation, ProviderAdapter,
    ProviderExchangeError,
};
use crate::identity::Claim;

pub const NAME: &str = "Facebook";

const ACCESS_TOKEN: &str = "urn:tokens:facebook:access_token";
const ID: &str = "urn:profile:facebook:id";
const FULL_NAME: &str = "urn:profile:facebook:name";
const EMAIL: &str = "urn:profile:facebook:email";

const CLAIM_TYPES: &[&str] = &[ACCESS_TOKEN, ID, FULL_NAME, EMAIL];

const AUTHORIZATION_ENDPOINT: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const TOKEN_ENDPOINT: &str = "https://graph.facebook.com/v19.0/oauth/access_token";
const USER_INFORMATION_ENDPOINT: &str = "https://graph.facebook.com/v19.0/me?fields=id,name,email";

#[derive(Clone, Debug, PartialEq)]
pub struct ProviderConfig {
    pub credentials: Credentials,
    pub endpoints: Endpoints,
}

impl ProviderConfig {
    pub fn from_store(store: &ConfigStore) -> Option<Self> {
        let (credentials, endpoints) = oauth2_settings(
            store,
            NAME,
            "AppId",
            "AppSecret",
            [
                AUTHORIZATION_ENDPOINT,
                TOKEN_ENDPOINT,
                USER_INFORMATION_ENDPOINT,
            ],
        )?;
        Some(Self {
            credentials,
            endpoints,
        })
    }
}

pub struct Provider {
    config: ProviderConfig,
}

impl Provider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProviderAdapter for Provider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn slug(&self) -> &'static str {
        "facebook"
    }

    fn declared_claim_types(&self) -> &'static [&'static str] {
        CLAIM_TYPES
    }

    async fn challenge(
        &self,
        _client: &Client,
        callback_url: &str,
        state: &str,
    ) -> Result<Challenge, ProviderExchangeError> {
        Ok(Challenge {
            redirect_uri: oauth2::authorization_url(
                &self.config.endpoints,
                &self.config.credentials,
                ",",
                callback_url,
                state,
            )?,
            request_token: None,
            request_token_secret: None,
        })
    }

    async fn callback(
        &self,
        client: &Client,
        callback_url: &str,
        payload: &CallbackPayload,
        _correlation: &HandshakeCorrelation,
    ) -> Result<ExternalProfile, ProviderExchangeError> {
        oauth2::exchange(
            client,
            &self.config.endpoints,
            &self.config.credentials,
            callback_url,
            payload,
        )
        .await
    }

    fn map_claims(&self, profile: &ExternalProfile) -> Vec<Claim> {
        vec![
            Claim::new(ACCESS_TOKEN, &profile.access_token),
            Claim::new(ID, profile.field("id")),
            Claim::new(FULL_NAME, profile.field("name")),
            Claim::new(EMAIL, profile.field("email")),
        ]
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn provider() -> Provider {
        Provider::new(ProviderConfig {
            credentials: Credentials {
                client_id: "app".to_string(),
                client_secret: "secret".to_string(),
                scopes: vec!["email".to_string(), "manage_pages".to_string()],
            },
            endpoints: Endpoints {
                authorization: AUTHORIZATION_ENDPOINT.to_string(),
                token: TOKEN_ENDPOINT.to_string(),
                user_information: USER_INFORMATION_ENDPOINT.to_string(),
            },
        })
    }

    #[tokio::test]
    async fn test_challenge_joins_scopes_with_commas() {
        let challenge = provider()
            .challenge(&Client::new(), "http://localhost/signin-facebook", "s1")
            .await
            .unwrap();

        assert!(challenge
            .redirect_uri
            .starts_with("https://www.facebook.com/v19.0/dialog/oauth?"));
        assert!(challenge.redirect_uri.contains("scope=email%2Cmanage_pages"));
        assert!(challenge.redirect_uri.contains("state=s1"));
        assert_eq!(challenge.request_token_secret, None);
    }

    #[test]
    fn test_map_full_profile() {
        let profile = ExternalProfile {
            access_token: "token".to_string(),
            access_token_secret: None,
            fields: json!({"id": "10", "name": "Ann", "email": "ann@example.com"})
                .as_object()
                .cloned()
                .unwrap(),
        };

        assert_eq!(
            provider().map_claims(&profile),
            vec![
                Claim::new(ACCESS_TOKEN, "token"),
                Claim::new(ID, "10"),
                Claim::new(FULL_NAME, "Ann"),
                Claim::new(EMAIL, "ann@example.com"),
            ]
        );
    }

    #[test]
    fn test_map_partial_profile_keeps_every_claim_type() {
        let profile = ExternalProfile {
            access_token: "token".to_string(),
            ..ExternalProfile::default()
        };

        let provider = provider();
        let claims = provider.map_claims(&profile);
        let types: Vec<_> = claims.iter().map(Claim::claim_type).collect();

        assert_eq!(types, provider.declared_claim_types());
        assert_eq!(claims[3], Claim::new(EMAIL, ""));
    }
}
