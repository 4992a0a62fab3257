//! OAuth 2.0 authorization-code flow shared by the OAuth2 providers.

use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::federation::{CallbackPayload, ExternalProfile, ProviderExchangeError};

#[derive(Clone, Debug, PartialEq)]
pub struct Endpoints {
    pub authorization: String,
    pub token: String,
    pub user_information: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub fn authorization_url(
    endpoints: &Endpoints,
    credentials: &Credentials,
    scope_separator: &str,
    callback_url: &str,
    state: &str,
) -> Result<String, ProviderExchangeError> {
    let mut url = Url::parse(&endpoints.authorization).map_err(|e| {
        ProviderExchangeError::InvalidResponse(format!(
            "Invalid authorization endpoint '{}': {e}",
            endpoints.authorization
        ))
    })?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &credentials.client_id)
        .append_pair("redirect_uri", callback_url)
        .append_pair("scope", &credentials.scopes.join(scope_separator))
        .append_pair("state", state);

    Ok(url.into())
}

/// Exchanges the authorization code and fetches the user information document.
pub async fn exchange(
    client: &Client,
    endpoints: &Endpoints,
    credentials: &Credentials,
    callback_url: &str,
    payload: &CallbackPayload,
) -> Result<ExternalProfile, ProviderExchangeError> {
    let code = payload
        .code
        .as_deref()
        .ok_or(ProviderExchangeError::MissingParameter("code"))?;

    let access_token = exchange_code(client, endpoints, credentials, callback_url, code).await?;
    let fields = fetch_user_information(client, &endpoints.user_information, &access_token).await?;

    Ok(ExternalProfile {
        access_token,
        access_token_secret: None,
        fields,
    })
}

async fn exchange_code(
    client: &Client,
    endpoints: &Endpoints,
    credentials: &Credentials,
    callback_url: &str,
    code: &str,
) -> Result<String, ProviderExchangeError> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", callback_url),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
    ];

    let response = client
        .post(&endpoints.token)
        .header(ACCEPT, "application/json")
        .form(&params)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!("Token endpoint answered {status}: {body}");
        return Err(ProviderExchangeError::Rejected(format!(
            "token endpoint answered {status}"
        )));
    }

    let token: TokenResponse = response.json().await?;
    Ok(token.access_token)
}

async fn fetch_user_information(
    client: &Client,
    endpoint: &str,
    access_token: &str,
) -> Result<Map<String, Value>, ProviderExchangeError> {
    let response = client
        .get(endpoint)
        .bearer_auth(access_token)
        .header(ACCEPT, "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderExchangeError::Rejected(format!(
            "user information endpoint answered {status}"
        )));
    }

    match response.json::<Value>().await? {
        Value::Object(fields) => Ok(fields),
        other => Err(ProviderExchangeError::InvalidResponse(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}
