use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::entity_store::{validate_name, EntityStore, Error};

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Default)]
pub struct Backend {
    collections: RwLock<Collections>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for Backend {
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, Error> {
        validate_name(collection)?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|entities| {
                entities
                    .iter()
                    .map(|(id, entity)| (id.clone(), entity.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, Error> {
        validate_name(collection)?;
        validate_name(id)?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|entities| entities.get(id))
            .cloned())
    }

    async fn put(&self, collection: &str, id: &str, entity: Value) -> Result<(), Error> {
        validate_name(collection)?;
        validate_name(id)?;

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), entity);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, Error> {
        validate_name(collection)?;
        validate_name(id)?;

        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .and_then(|entities| entities.remove(id))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud() {
        let store = Backend::new();

        store
            .put("albums", "2", json!({"title": "Blue Train"}))
            .await
            .unwrap();
        store
            .put("albums", "1", json!({"title": "Kind of Blue"}))
            .await
            .unwrap();

        let albums = store.list("albums").await.unwrap();
        let ids: Vec<_> = albums.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        assert_eq!(
            store.get("albums", "1").await.unwrap(),
            Some(json!({"title": "Kind of Blue"}))
        );
        assert!(store.delete("albums", "1").await.unwrap());
        assert!(!store.delete("albums", "1").await.unwrap());
        assert_eq!(store.get("albums", "1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_empty() {
        let store = Backend::new();
        assert!(store.list("genres").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_names() {
        let store = Backend::new();
        assert!(matches!(
            store.get("../albums", "1").await,
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            store.put("albums", "a/b", json!({})).await,
            Err(Error::InvalidName(_))
        ));
    }
}
