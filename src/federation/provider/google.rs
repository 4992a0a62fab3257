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

pub const NAME: &str = "Google";

const ACCESS_TOKEN: &str = "urn:tokens:google:access_token";
const ID: &str = "urn:profile:google:id";
const FULL_NAME: &str = "urn:profile:google:name";
const EMAIL: &str = "urn:profile:google:email";

const CLAIM_TYPES: &[&str] = &[ACCESS_TOKEN, ID, FULL_NAME, EMAIL];

const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USER_INFORMATION_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

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
        "google"
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

    // OpenID Connect user information names the subject `sub`, older endpoints `id`
    fn map_claims(&self, profile: &ExternalProfile) -> Vec<Claim> {
        vec![
            Claim::new(ACCESS_TOKEN, &profile.access_token),
            Claim::new(ID, profile.first_field(&["sub", "id"])),
            Claim::new(FULL_NAME, profile.field("name")),
            Claim::new(EMAIL, profile.field("email")),
        ]
    }
}
