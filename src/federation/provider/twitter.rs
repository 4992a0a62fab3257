use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{Map, Value};

use crate::configuration::ConfigStore;
use crate::federation::oauth1::{self, ConsumerCredentials, SignedRequest};
use crate::federation::provider::{credential_pair, endpoint};
use crate::federation::{
    CallbackPayload, Challenge, ExternalProfile, HandshakeCorrelation, ProviderAdapter,
    ProviderExchangeError,
};
use crate::identity::Claim;

pub const NAME: &str = "Twitter";

const ACCESS_TOKEN: &str = "urn:tokens:twitter:accesstoken";
const ACCESS_TOKEN_SECRET: &str = "urn:tokens:twitter:accesstokensecret";
const USER_ID: &str = "urn:profile:twitter:userid";
const SCREEN_NAME: &str = "urn:profile:twitter:screenname";

const CLAIM_TYPES: &[&str] = &[ACCESS_TOKEN, ACCESS_TOKEN_SECRET, USER_ID, SCREEN_NAME];

const REQUEST_TOKEN_ENDPOINT: &str = "https://api.twitter.com/oauth/request_token";
const AUTHORIZATION_ENDPOINT: &str = "https://api.twitter.com/oauth/authenticate";
const ACCESS_TOKEN_ENDPOINT: &str = "https://api.twitter.com/oauth/access_token";

#[derive(Clone, Debug, PartialEq)]
pub struct ProviderConfig {
    pub consumer: ConsumerCredentials,
    pub request_token_endpoint: String,
    pub authorization_endpoint: String,
    pub access_token_endpoint: String,
}

impl ProviderConfig {
    pub fn from_store(store: &ConfigStore) -> Option<Self> {
        let (key, secret) = credential_pair(store, NAME, "ConsumerKey", "ConsumerSecret")?;
        Some(Self {
            consumer: ConsumerCredentials { key, secret },
            request_token_endpoint: endpoint(
                store,
                NAME,
                "RequestTokenEndpoint",
                REQUEST_TOKEN_ENDPOINT,
            ),
            authorization_endpoint: endpoint(
                store,
                NAME,
                "AuthorizationEndpoint",
                AUTHORIZATION_ENDPOINT,
            ),
            access_token_endpoint: endpoint(
                store,
                NAME,
                "AccessTokenEndpoint",
                ACCESS_TOKEN_ENDPOINT,
            ),
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

fn required<'a>(
    response: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, ProviderExchangeError> {
    response
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ProviderExchangeError::InvalidResponse(format!("{name} is missing")))
}

#[async_trait]
impl ProviderAdapter for Provider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn slug(&self) -> &'static str {
        "twitter"
    }

    fn declared_claim_types(&self) -> &'static [&'static str] {
        CLAIM_TYPES
    }

    // OAuth1 has no state parameter: it travels in the callback URL instead
    async fn challenge(
        &self,
        client: &Client,
        callback_url: &str,
        state: &str,
    ) -> Result<Challenge, ProviderExchangeError> {
        let callback = format!("{callback_url}?state={}", oauth1::encode(state));
        let request = SignedRequest {
            method: "POST",
            url: &self.config.request_token_endpoint,
            token: None,
            protocol_parameters: vec![("oauth_callback", callback.as_str())],
            request_parameters: Vec::new(),
        };

        let response = oauth1::post_for_token(client, &self.config.consumer, &request).await?;
        if response.get("oauth_callback_confirmed").map(String::as_str) != Some("true") {
            return Err(ProviderExchangeError::Rejected(
                "callback was not confirmed".to_string(),
            ));
        }
        let token = required(&response, "oauth_token")?;
        let token_secret = required(&response, "oauth_token_secret")?;

        let mut redirect = Url::parse(&self.config.authorization_endpoint).map_err(|e| {
            ProviderExchangeError::InvalidResponse(format!("Invalid authorization endpoint: {e}"))
        })?;
        redirect.query_pairs_mut().append_pair("oauth_token", token);

        Ok(Challenge {
            redirect_uri: redirect.into(),
            request_token: Some(token.to_string()),
            request_token_secret: Some(token_secret.to_string()),
        })
    }

    async fn callback(
        &self,
        client: &Client,
        _callback_url: &str,
        payload: &CallbackPayload,
        correlation: &HandshakeCorrelation,
    ) -> Result<ExternalProfile, ProviderExchangeError> {
        let token = payload
            .oauth_token
            .as_deref()
            .ok_or(ProviderExchangeError::MissingParameter("oauth_token"))?;
        let verifier = payload
            .oauth_verifier
            .as_deref()
            .ok_or(ProviderExchangeError::MissingParameter("oauth_verifier"))?;
        let request_token_secret = correlation
            .request_token_secret
            .as_deref()
            .ok_or(ProviderExchangeError::MissingParameter("request token secret"))?;
        if correlation.request_token.as_deref() != Some(token) {
            return Err(ProviderExchangeError::Rejected(
                "oauth_token does not match the request token".to_string(),
            ));
        }

        let request = SignedRequest {
            method: "POST",
            url: &self.config.access_token_endpoint,
            token: Some((token, request_token_secret)),
            protocol_parameters: vec![("oauth_verifier", verifier)],
            request_parameters: Vec::new(),
        };
        let response = oauth1::post_for_token(client, &self.config.consumer, &request).await?;

        let access_token = required(&response, "oauth_token")?.to_string();
        let access_token_secret = required(&response, "oauth_token_secret")?.to_string();

        let mut fields = Map::new();
        for field in ["user_id", "screen_name"] {
            if let Some(value) = response.get(field) {
                fields.insert(field.to_string(), Value::String(value.clone()));
            }
        }

        Ok(ExternalProfile {
            access_token,
            access_token_secret: Some(access_token_secret),
            fields,
        })
    }

    fn map_claims(&self, profile: &ExternalProfile) -> Vec<Claim> {
        vec![
            Claim::new(ACCESS_TOKEN, &profile.access_token),
            Claim::new(
                ACCESS_TOKEN_SECRET,
                profile.access_token_secret.clone().unwrap_or_default(),
            ),
            Claim::new(USER_ID, profile.field("user_id")),
            Claim::new(SCREEN_NAME, profile.field("screen_name")),
        ]
    }
}
