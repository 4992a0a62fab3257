//! OAuth 1.0a request signing (HMAC-SHA1) and the three-legged token flow.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use sha1::Sha1;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::federation::ProviderExchangeError;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_METHOD: &str = "HMAC-SHA1";
pub const VERSION: &str = "1.0";

/// Percent-encoding of RFC 3986: everything but `A-Z a-z 0-9 - . _ ~`.
pub fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Normalized request parameters joined into the signature base string.
pub fn signature_base_string(method: &str, base_url: &str, parameters: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = parameters
        .iter()
        .map(|(key, value)| (encode(key), encode(value)))
        .collect();
    encoded.sort();

    let normalized = encoded
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(base_url),
        encode(&normalized)
    )
}

pub fn sign(
    base_string: &str,
    consumer_secret: &str,
    token_secret: Option<&str>,
) -> Result<String, ProviderExchangeError> {
    let key = format!(
        "{}&{}",
        encode(consumer_secret),
        encode(token_secret.unwrap_or_default())
    );

    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| ProviderExchangeError::InvalidResponse(format!("Invalid signing key: {e}")))?;
    mac.update(base_string.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConsumerCredentials {
    pub key: String,
    pub secret: String,
}

/// A request about to be signed.
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub token: Option<(&'a str, &'a str)>,
    /// `oauth_*` protocol parameters beyond the standard set (`oauth_callback`, `oauth_verifier`).
    pub protocol_parameters: Vec<(&'a str, &'a str)>,
    /// Query or form parameters sent with the request, part of the signature.
    pub request_parameters: Vec<(&'a str, &'a str)>,
}

impl SignedRequest<'_> {
    /// The `Authorization: OAuth ...` header value.
    pub fn authorization_header(
        &self,
        consumer: &ConsumerCredentials,
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, ProviderExchangeError> {
        let mut oauth_parameters = vec![
            ("oauth_consumer_key", consumer.key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", SIGNATURE_METHOD),
            ("oauth_timestamp", timestamp),
            ("oauth_version", VERSION),
        ];
        if let Some((token, _)) = self.token {
            oauth_parameters.push(("oauth_token", token));
        }
        oauth_parameters.extend(self.protocol_parameters.iter().copied());

        let mut signed_parameters = oauth_parameters.clone();
        signed_parameters.extend(self.request_parameters.iter().copied());

        let base_string = signature_base_string(self.method, self.url, &signed_parameters);
        let signature = sign(
            &base_string,
            &consumer.secret,
            self.token.map(|(_, secret)| secret),
        )?;

        oauth_parameters.push(("oauth_signature", &signature));
        oauth_parameters.sort_unstable();

        let header = oauth_parameters
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", encode(key), encode(value)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {header}"))
    }
}

/// POSTs a signed request and decodes the form-encoded token response.
pub async fn post_for_token(
    client: &Client,
    consumer: &ConsumerCredentials,
    request: &SignedRequest<'_>,
) -> Result<HashMap<String, String>, ProviderExchangeError> {
    let nonce = Uuid::new_v4().simple().to_string();
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let header = request.authorization_header(consumer, &nonce, &timestamp)?;

    let response = client
        .post(request.url)
        .header(AUTHORIZATION, header)
        .form(&request.request_parameters)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        debug!("Token endpoint {} answered {status}: {body}", request.url);
        return Err(ProviderExchangeError::Rejected(format!(
            "token endpoint answered {status}"
        )));
    }

    serde_urlencoded::from_str(&body)
        .map_err(|e| ProviderExchangeError::InvalidResponse(format!("Malformed token response: {e}")))
}
