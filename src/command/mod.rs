use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::configuration::Configuration;
use crate::federation::FederationCoordinator;
use crate::pipeline::{Components, FsAssetResolver, SessionManager};
use crate::policy::PolicyEvaluator;

mod error;
pub mod inspect;
pub mod serve;

pub use error::Error;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

fn build_http_client(config: &Configuration) -> Result<Client, Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(config.federation.exchange_timeout)
        .build()
        .map_err(|error| Error::Initialization(format!("Failed to build HTTP client: {error}")))
}

/// Builds the collaborators every pipeline stage is assembled from.
pub fn build_components(config: &Configuration) -> Result<Components, Error> {
    let entities = config.entity_store.to_backend()?;
    let session_store = config.session.store.to_backend()?;

    let providers = config
        .providers
        .iter()
        .map(crate::federation::provider::Config::to_adapter)
        .collect::<Vec<_>>();
    info!(
        "Enabled external providers: [{}]",
        config
            .providers
            .iter()
            .map(crate::federation::provider::Config::name)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let coordinator = FederationCoordinator::new(
        providers,
        build_http_client(config)?,
        Arc::clone(&session_store),
        &config.server.public_origin,
        &config.federation,
    );

    Ok(Components {
        sessions: Arc::new(SessionManager::new(session_store, &config.session)),
        assets: Arc::new(FsAssetResolver::new(&config.static_files.root)),
        coordinator: Arc::new(coordinator),
        evaluator: Arc::new(PolicyEvaluator::from_config(&config.policies)),
        protected_routes: config.protected_routes.clone(),
        entities,
    })
}
