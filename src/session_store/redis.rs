use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::info;

use crate::session_store::{Error, SessionStore};

#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug)]
pub struct Backend {
    client: redis::Client,
    key_prefix: String,
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Result<Self, Error> {
        info!("Using Redis session store");
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Backend {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, Error> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

#[async_trait]
impl SessionStore for Backend {
    async fn store_value(&self, key: &str, value: &str, expires_in: u64) -> Result<(), Error> {
        let mut conn = self.get_connection().await?;
        // SETEX rejects a zero TTL
        let expires_in = expires_in.max(1);
        Ok(conn.set_ex(self.prefixed(key), value, expires_in).await?)
    }

    async fn retrieve_value(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.prefixed(key)).await?;
        Ok(value)
    }

    async fn take_value(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get_del(self.prefixed(key)).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    fn backend(prefix: &str) -> Backend {
        let config = BackendConfig {
            url: "redis://localhost:6379/0".to_string(),
            key_prefix: prefix.to_owned(),
        };
        Backend::new(&config).unwrap()
    }

    #[test]
    fn test_prefixed_key() {
        let sessions = backend("storefront:");
        assert_eq!(sessions.prefixed("session:abc"), "storefront:session:abc");
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn test_store_retrieve_and_take() {
        let sessions = backend("test_session_store:");

        sessions.store_value("key", "principal", 1).await.unwrap();
        assert_eq!(
            sessions.retrieve_value("key").await,
            Ok(Some("principal".to_string()))
        );
        assert_eq!(
            sessions.take_value("key").await,
            Ok(Some("principal".to_string()))
        );
        assert_eq!(sessions.take_value("key").await, Ok(None));

        sessions.store_value("ttl", "principal", 1).await.unwrap();
        time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(sessions.retrieve_value("ttl").await, Ok(None));
    }
}
