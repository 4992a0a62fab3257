use async_trait::async_trait;
use reqwest::Client;

use crate::configuration::ConfigStore;
use crate::federation::oauth2::{self, Credentials, Endpoints};
use crate::federation::provider::{oauth2_settings, SECTION};
use crate::federation::{
    CallbackPayload, Challenge, ExternalProfile, HandshakeCorrelation, ProviderAdapter,
    ProviderExchangeError,
};
use crate::identity::Claim;

pub const NAME: &str = "MicrosoftAccount";

const ACCESS_TOKEN: &str = "urn:tokens:microsoft:access_token";
const ID: &str = "urn:profile:microsoft:id";
const FULL_NAME: &str = "urn:profile:microsoft:name";
const EMAIL: &str = "urn:profile:microsoft:email";

const CLAIM_TYPES: &[&str] = &[ACCESS_TOKEN, ID, FULL_NAME, EMAIL];

const AUTHORIZATION_ENDPOINT: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_ENDPOINT: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const USER_INFORMATION_ENDPOINT: &str = "https://graph.microsoft.com/v1.0/me";

#[derive(Clone, Debug, PartialEq)]
pub struct ProviderConfig {
    pub credentials: Credentials,
    pub endpoints: Endpoints,
    pub caption: String,
}

impl ProviderConfig {
    pub fn from_store(store: &ConfigStore) -> Option<Self> {
        let (credentials, endpoints) = oauth2_settings(
            store,
            NAME,
            "ClientId",
            "ClientSecret",
            [
                AUTHORIZATION_ENDPOINT,
                TOKEN_ENDPOINT,
                USER_INFORMATION_ENDPOINT,
            ],
        )?;
        Some(Self {
            credentials,
            endpoints,
            caption: store.get_or(&format!("{SECTION}:{NAME}:Caption"), NAME),
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
        "microsoft"
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
                " ",
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
            Claim::new(FULL_NAME, profile.first_field(&["displayName", "name"])),
            Claim::new(
                EMAIL,
                profile.first_field(&["mail", "userPrincipalName", "email"]),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::configuration::MemorySource;

    #[test]
    fn test_caption_defaults_to_name() {
        let mut store = ConfigStore::new();
        store.add_source(MemorySource::new(
            "test",
            [
                ("ExternalProviders:MicrosoftAccount:ClientId", "id"),
                ("ExternalProviders:MicrosoftAccount:ClientSecret", "secret"),
            ],
        ));

        let config = ProviderConfig::from_store(&store).unwrap();
        assert_eq!(config.caption, "MicrosoftAccount");
        assert_eq!(config.endpoints.user_information, USER_INFORMATION_ENDPOINT);
    }

    #[test]
    fn test_map_graph_profile() {
        let provider = Provider::new(ProviderConfig {
            credentials: Credentials {
                client_id: String::new(),
                client_secret: String::new(),
                scopes: Vec::new(),
            },
            endpoints: Endpoints {
                authorization: AUTHORIZATION_ENDPOINT.to_string(),
                token: TOKEN_ENDPOINT.to_string(),
                user_information: USER_INFORMATION_ENDPOINT.to_string(),
            },
            caption: NAME.to_string(),
        });
        let profile = ExternalProfile {
            access_token: "token".to_string(),
            access_token_secret: None,
            fields: json!({"id": "ab12", "displayName": "Ann", "mail": null, "userPrincipalName": "ann@contoso.com"})
                .as_object()
                .cloned()
                .unwrap(),
        };

        assert_eq!(
            provider.map_claims(&profile),
            vec![
                Claim::new(ACCESS_TOKEN, "token"),
                Claim::new(ID, "ab12"),
                Claim::new(FULL_NAME, "Ann"),
                Claim::new(EMAIL, "ann@contoso.com"),
            ]
        );

        let claims = provider.map_claims(&ExternalProfile::default());
        let types: Vec<_> = claims.iter().map(Claim::claim_type).collect();
        assert_eq!(types, provider.declared_claim_types());
    }
}
