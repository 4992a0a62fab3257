use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::info;

mod error;
pub mod fs;
pub mod memory;

pub use error::Error;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").unwrap());

/// Rejects names that cannot safely be used as collection or entity identifiers.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if NAME_RE.is_match(name) && !name.contains("..") {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// CRUD access to application entities, keyed by collection and identifier.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Entities of `collection`, ordered by identifier.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, Error>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, Error>;

    /// Creates or replaces the entity.
    async fn put(&self, collection: &str, id: &str, entity: Value) -> Result<(), Error>;

    /// Returns whether an entity was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, Error>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum Config {
    Memory,
    FS(fs::BackendConfig),
}

impl Config {
    /// Parses `memory://` or `fs://<root directory>`.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, Error> {
        let connection_string = connection_string.trim();

        if connection_string.eq_ignore_ascii_case("memory://") {
            return Ok(Config::Memory);
        }

        if let Some(root_dir) = connection_string.strip_prefix("fs://") {
            if root_dir.is_empty() {
                return Err(Error::Configuration(
                    "Filesystem connection string has no root directory".to_string(),
                ));
            }
            return Ok(Config::FS(fs::BackendConfig {
                root_dir: PathBuf::from(root_dir),
            }));
        }

        let scheme = connection_string
            .split_once("://")
            .map_or(connection_string, |(scheme, _)| scheme);
        Err(Error::Configuration(format!(
            "Unsupported connection string scheme '{scheme}'"
        )))
    }

    pub fn to_backend(&self) -> Result<Arc<dyn EntityStore>, Error> {
        match self {
            Config::Memory => {
                info!("Using in-memory entity store");
                Ok(Arc::new(memory::Backend::new()))
            }
            Config::FS(config) => {
                info!("Using filesystem entity store at {}", config.root_dir.display());
                Ok(Arc::new(fs::Backend::new(config)?))
            }
        }
    }
}
