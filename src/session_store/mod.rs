use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

mod error;
pub mod memory;
pub mod redis;

pub use error::Error;

/// Key-value store for sessions and in-flight handshake correlations.
///
/// Every entry carries a time-to-live; expired entries are never returned.
#[async_trait]
pub trait SessionStore: Any + Debug + Send + Sync {
    /// Store `value` under `key` for `expires_in` seconds, replacing any previous value.
    async fn store_value(&self, key: &str, value: &str, expires_in: u64) -> Result<(), Error>;

    /// The current value of `key`, or `None` when absent or expired.
    async fn retrieve_value(&self, key: &str) -> Result<Option<String>, Error>;

    /// Remove `key` and return the value it held.
    ///
    /// A value can be taken at most once, even under concurrent callers.
    async fn take_value(&self, key: &str) -> Result<Option<String>, Error>;

    async fn remove_value(&self, key: &str) -> Result<(), Error> {
        self.take_value(key).await.map(|_| ())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Config {
    #[default]
    Memory,
    Redis(redis::BackendConfig),
}

impl Config {
    pub fn to_backend(&self) -> Result<Arc<dyn SessionStore>, Error> {
        match self {
            Config::Redis(config) => Ok(Arc::new(redis::Backend::new(config)?)),
            Config::Memory => Ok(Arc::new(memory::Backend::new())),
        }
    }
}

pub async fn store<T>(
    sessions: &dyn SessionStore,
    key: &str,
    value: &T,
    ttl: u64,
) -> Result<(), Error>
where
    T: Serialize,
{
    let serialized = serde_json::to_string(value)?;
    sessions.store_value(key, &serialized, ttl).await
}

pub async fn retrieve<T>(sessions: &dyn SessionStore, key: &str) -> Result<Option<T>, Error>
where
    T: DeserializeOwned,
{
    let Some(serialized) = sessions.retrieve_value(key).await? else {
        return Ok(None);
    };
    decode(key, &serialized).map(Some)
}

pub async fn take<T>(sessions: &dyn SessionStore, key: &str) -> Result<Option<T>, Error>
where
    T: DeserializeOwned,
{
    let Some(serialized) = sessions.take_value(key).await? else {
        return Ok(None);
    };
    decode(key, &serialized).map(Some)
}

fn decode<T: DeserializeOwned>(key: &str, serialized: &str) -> Result<T, Error> {
    serde_json::from_str(serialized).map_err(|e| {
        warn!("Failed to deserialize session value for key {key}: {e}");
        Error::from(e)
    })
}
