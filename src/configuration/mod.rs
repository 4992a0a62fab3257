use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use hyper::Method;
use tracing::{info, warn};

mod error;
mod source;
mod store;

use crate::federation::provider;
use crate::pipeline::Environment;
use crate::policy::ClaimRequirement;
use crate::{entity_store, session_store};
pub use error::Error;
#[cfg(test)]
pub use source::MemorySource;
pub use store::ConfigStore;

/// Prefix of the process environment variables visible to configuration.
pub const ENV_PREFIX: &str = "STOREFRONT_";

pub const ENVIRONMENT_KEY: &str = "Hosting:Environment";
pub const CONNECTION_STRING_KEY: &str = "Data:DefaultConnection:ConnectionString";

/// Values registered before any user-provided source.
pub fn defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Server:BindAddress", "0.0.0.0"),
        ("Server:Port", "5001"),
        ("Server:QueryTimeout", "3600"),
        ("Server:QueryTimeoutGracePeriod", "60"),
        ("Server:MaxBodySize", "1048576"),
        ("Session:Store", "memory"),
        ("Session:CookieName", ".Storefront.Session"),
        ("Session:IdleTimeout", "1200"),
        ("Session:Redis:KeyPrefix", "storefront:"),
        ("Federation:ExchangeTimeoutMs", "10000"),
        ("Federation:CorrelationTtl", "900"),
        ("ExternalProviders:Facebook:Scope", "email,manage_pages"),
        ("ExternalProviders:Google:Scope", "openid,profile,email"),
        ("ExternalProviders:MicrosoftAccount:Scope", "User.Read"),
        ("ExternalProviders:MicrosoftAccount:Caption", "MicrosoftAccount"),
        (
            "Authorization:Policies:ManageStore:Requirements:0:Type",
            "ManageStore",
        ),
        (
            "Authorization:Policies:ManageStore:Requirements:0:Value",
            "Allowed",
        ),
        (
            "Authorization:ProtectedRoutes:StoreManager:Prefix",
            "/StoreManager",
        ),
        (
            "Authorization:ProtectedRoutes:StoreManager:Policy",
            "ManageStore",
        ),
        ("Authorization:ProtectedRoutes:EntityWrites:Prefix", "/api"),
        ("Authorization:ProtectedRoutes:EntityWrites:Policy", "ManageStore"),
        (
            "Authorization:ProtectedRoutes:EntityWrites:Methods",
            "POST,PUT,PATCH,DELETE",
        ),
        ("StaticFiles:Root", "wwwroot"),
    ]
}

#[derive(Clone, Debug)]
pub struct Configuration {
    /// Names of the sources the values were resolved from, lowest precedence first.
    pub sources: Vec<String>,
    pub environment: Environment,
    pub server: ServerConfig,
    pub entity_store: entity_store::Config,
    pub session: SessionConfig,
    pub federation: FederationConfig,
    pub providers: Vec<provider::Config>,
    pub policies: Vec<PolicyConfig>,
    pub protected_routes: Vec<ProtectedRouteConfig>,
    pub static_files: StaticFilesConfig,
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub query_timeout: u64,
    pub query_timeout_grace_period: u64,
    pub max_body_size: u64,
    pub public_origin: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub store: session_store::Config,
    pub cookie_name: String,
    pub idle_timeout: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FederationConfig {
    pub exchange_timeout: Duration,
    pub correlation_ttl: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PolicyConfig {
    pub name: String,
    pub requirements: Vec<ClaimRequirement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProtectedRouteConfig {
    pub prefix: String,
    pub policy: String,
    /// Methods the rule applies to; empty means every method.
    pub methods: Vec<Method>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StaticFilesConfig {
    pub root: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservabilityConfig {
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    /// Assembles the layered store from `path` and the process environment,
    /// then derives the typed configuration from it.
    pub fn load(path: &str, environment_override: Option<&str>) -> Result<Self, Error> {
        let store = ConfigStore::load_default(path, ENV_PREFIX)?;
        Self::from_store(&store, environment_override)
    }

    pub fn from_store(
        store: &ConfigStore,
        environment_override: Option<&str>,
    ) -> Result<Self, Error> {
        let environment_tag = environment_override
            .map(ToString::to_string)
            .or_else(|| store.get(ENVIRONMENT_KEY))
            .unwrap_or_default();
        let environment = Environment::from_tag(&environment_tag);
        info!("Hosting environment: {environment} (requested '{environment_tag}')");

        let connection_string = store.require(CONNECTION_STRING_KEY)?;
        let entity_store = entity_store::Config::from_connection_string(&connection_string)?;

        let server = ServerConfig::from_store(store)?;
        let session = SessionConfig::from_store(store)?;

        let federation = FederationConfig {
            exchange_timeout: Duration::from_millis(
                store.get_parsed_or("Federation:ExchangeTimeoutMs", 10_000)?,
            ),
            correlation_ttl: store.get_parsed_or("Federation:CorrelationTtl", 900)?,
        };

        let providers = provider::Config::from_store(store);
        if providers.is_empty() {
            warn!("No external provider is configured, federated sign-in is disabled");
        }

        let observability = store
            .get("Observability:Tracing:Endpoint")
            .map(|endpoint| -> Result<ObservabilityConfig, Error> {
                Ok(ObservabilityConfig {
                    tracing: Some(TracingConfig {
                        endpoint,
                        sampling_rate: store
                            .get_parsed_or("Observability:Tracing:SamplingRate", 1.0)?,
                    }),
                })
            })
            .transpose()?;

        Ok(Self {
            sources: store
                .source_names()
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            environment,
            server,
            entity_store,
            session,
            federation,
            providers,
            policies: PolicyConfig::from_store(store)?,
            protected_routes: ProtectedRouteConfig::from_store(store)?,
            static_files: StaticFilesConfig {
                root: PathBuf::from(store.get_or("StaticFiles:Root", "wwwroot")),
            },
            observability,
        })
    }
}

impl ServerConfig {
    fn from_store(store: &ConfigStore) -> Result<Self, Error> {
        let bind_address = store
            .get_parsed("Server:BindAddress")?
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let port = store.get_parsed_or("Server:Port", 5001)?;
        let public_origin = store
            .get("Server:PublicOrigin")
            .map(|origin| origin.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        Ok(Self {
            bind_address,
            port,
            query_timeout: store.get_parsed_or("Server:QueryTimeout", 3600)?,
            query_timeout_grace_period: store
                .get_parsed_or("Server:QueryTimeoutGracePeriod", 60)?,
            max_body_size: store.get_parsed_or("Server:MaxBodySize", 1_048_576)?,
            public_origin,
        })
    }
}

impl SessionConfig {
    fn from_store(store: &ConfigStore) -> Result<Self, Error> {
        let store_config = match store.get_or("Session:Store", "memory").to_ascii_lowercase().as_str() {
            "memory" => session_store::Config::Memory,
            "redis" => session_store::Config::Redis(session_store::redis::BackendConfig {
                url: store.require("Session:Redis:Url")?,
                key_prefix: store.get_or("Session:Redis:KeyPrefix", "storefront:"),
            }),
            other => {
                return Err(Error::InvalidValue {
                    key: "Session:Store".to_string(),
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            store: store_config,
            cookie_name: store.get_or("Session:CookieName", ".Storefront.Session"),
            idle_timeout: store.get_parsed_or("Session:IdleTimeout", 1200)?,
        })
    }
}

impl PolicyConfig {
    fn from_store(store: &ConfigStore) -> Result<Vec<Self>, Error> {
        store
            .children("Authorization:Policies")
            .into_iter()
            .map(|name| {
                let section = format!("Authorization:Policies:{name}:Requirements");
                let mut requirements = Vec::new();
                for index in store.children(&section) {
                    let Some(claim_type) = store.get(&format!("{section}:{index}:Type")) else {
                        continue;
                    };
                    let value = store.require(&format!("{section}:{index}:Value"))?;
                    requirements.push(ClaimRequirement::new(&claim_type, &value));
                }

                Ok(PolicyConfig { name, requirements })
            })
            .collect()
    }
}

impl ProtectedRouteConfig {
    fn from_store(store: &ConfigStore) -> Result<Vec<Self>, Error> {
        let mut routes = Vec::new();
        for name in store.children("Authorization:ProtectedRoutes") {
            let section = format!("Authorization:ProtectedRoutes:{name}");
            let Some(prefix) = store.get(&format!("{section}:Prefix")) else {
                continue;
            };
            let Some(policy) = store.get(&format!("{section}:Policy")) else {
                warn!("Protected route '{name}' has no policy, ignoring it");
                continue;
            };

            let methods_key = format!("{section}:Methods");
            let methods = store
                .get(&methods_key)
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|method| !method.is_empty())
                .map(|method| {
                    Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
                        Error::InvalidValue {
                            key: methods_key.clone(),
                            value: method.to_string(),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            routes.push(ProtectedRouteConfig {
                prefix,
                policy,
                methods,
            });
        }
        Ok(routes)
    }
}
