pub mod facebook;
pub mod google;
pub mod microsoft;
pub mod twitter;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::configuration::ConfigStore;
use crate::federation::oauth2::{Credentials, Endpoints};
use crate::federation::ProviderAdapter;

pub const SECTION: &str = "ExternalProviders";

#[derive(Clone, Debug, PartialEq)]
pub enum Config {
    Facebook(facebook::ProviderConfig),
    Google(google::ProviderConfig),
    Twitter(twitter::ProviderConfig),
    MicrosoftAccount(microsoft::ProviderConfig),
}

impl Config {
    /// Every provider with complete credentials, in a fixed order.
    pub fn from_store(store: &ConfigStore) -> Vec<Self> {
        [
            facebook::ProviderConfig::from_store(store).map(Config::Facebook),
            google::ProviderConfig::from_store(store).map(Config::Google),
            twitter::ProviderConfig::from_store(store).map(Config::Twitter),
            microsoft::ProviderConfig::from_store(store).map(Config::MicrosoftAccount),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Config::Facebook(_) => facebook::NAME,
            Config::Google(_) => google::NAME,
            Config::Twitter(_) => twitter::NAME,
            Config::MicrosoftAccount(_) => microsoft::NAME,
        }
    }

    /// Label shown on the sign-in button.
    pub fn caption(&self) -> &str {
        match self {
            Config::MicrosoftAccount(config) => &config.caption,
            _ => self.name(),
        }
    }

    pub fn to_adapter(&self) -> Arc<dyn ProviderAdapter> {
        match self {
            Config::Facebook(config) => Arc::new(facebook::Provider::new(config.clone())),
            Config::Google(config) => Arc::new(google::Provider::new(config.clone())),
            Config::Twitter(config) => Arc::new(twitter::Provider::new(config.clone())),
            Config::MicrosoftAccount(config) => {
                Arc::new(microsoft::Provider::new(config.clone()))
            }
        }
    }
}

/// Reads an id/secret pair; a provider missing either one is disabled.
pub fn credential_pair(
    store: &ConfigStore,
    provider: &str,
    id_key: &str,
    secret_key: &str,
) -> Option<(String, String)> {
    let id = store
        .get(&format!("{SECTION}:{provider}:{id_key}"))
        .filter(|value| !value.trim().is_empty());
    let secret = store
        .get(&format!("{SECTION}:{provider}:{secret_key}"))
        .filter(|value| !value.trim().is_empty());

    match (id, secret) {
        (Some(id), Some(secret)) => Some((id, secret)),
        (None, None) => {
            debug!("Provider {provider} is not configured");
            None
        }
        (Some(_), None) => {
            warn!("Provider {provider} is disabled: {id_key} is set but {secret_key} is missing");
            None
        }
        (None, Some(_)) => {
            warn!("Provider {provider} is disabled: {secret_key} is set but {id_key} is missing");
            None
        }
    }
}

/// An endpoint URL, overridable with `ExternalProviders:<provider>:<key>`.
pub fn endpoint(store: &ConfigStore, provider: &str, key: &str, default: &str) -> String {
    store.get_or(&format!("{SECTION}:{provider}:{key}"), default)
}

/// Requested scopes, separated by commas or whitespace.
pub fn scopes(store: &ConfigStore, provider: &str) -> Vec<String> {
    store
        .get(&format!("{SECTION}:{provider}:Scope"))
        .unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|scope| !scope.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Credentials and endpoints of an OAuth2 provider.
pub fn oauth2_settings(
    store: &ConfigStore,
    provider: &str,
    id_key: &str,
    secret_key: &str,
    defaults: [&str; 3],
) -> Option<(Credentials, Endpoints)> {
    let (client_id, client_secret) = credential_pair(store, provider, id_key, secret_key)?;
    let [authorization, token, user_information] = defaults;

    Some((
        Credentials {
            client_id,
            client_secret,
            scopes: scopes(store, provider),
        },
        Endpoints {
            authorization: endpoint(store, provider, "AuthorizationEndpoint", authorization),
            token: endpoint(store, provider, "TokenEndpoint", token),
            user_information: endpoint(
                store,
                provider,
                "UserInformationEndpoint",
                user_information,
            ),
        },
    ))
}
