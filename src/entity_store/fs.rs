use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::entity_store::{validate_name, EntityStore, Error};

// NOTE: entities are small JSON documents and async FS operations perform poorly on most
// platforms, so standard IO is used here.

#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    pub root_dir: PathBuf,
}

/// One directory per collection, one `<id>.json` file per entity.
#[derive(Debug)]
pub struct Backend {
    root_dir: PathBuf,
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Result<Self, Error> {
        fs::create_dir_all(&config.root_dir)?;
        Ok(Self {
            root_dir: config.root_dir.clone(),
        })
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, Error> {
        validate_name(collection)?;
        Ok(self.root_dir.join(collection))
    }

    fn entity_path(&self, collection: &str, id: &str) -> Result<PathBuf, Error> {
        validate_name(id)?;
        Ok(self.collection_dir(collection)?.join(format!("{id}.json")))
    }

    fn read_entity(path: &Path) -> Result<Option<Value>, Error> {
        match fs::read(path) {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EntityStore for Backend {
    #[instrument(skip(self))]
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, Error> {
        let dir = self.collection_dir(collection)?;
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entities = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            let Some(id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(".json"))
            else {
                continue;
            };
            if validate_name(id).is_err() {
                continue;
            }

            if let Some(entity) = Self::read_entity(&path)? {
                entities.push((id.to_string(), entity));
            }
        }

        entities.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(entities)
    }

    #[instrument(skip(self))]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, Error> {
        let path = self.entity_path(collection, id)?;
        Self::read_entity(&path)
    }

    #[instrument(skip(self, entity))]
    async fn put(&self, collection: &str, id: &str, entity: Value) -> Result<(), Error> {
        let path = self.entity_path(collection, id)?;
        fs::create_dir_all(self.collection_dir(collection)?)?;

        // write-then-rename so readers never observe a partial document
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(&entity)?)?;
        fs::rename(&staging, &path)?;
        debug!("Stored entity at {}", path.display());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, Error> {
        let path = self.entity_path(collection, id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> (tempfile::TempDir, Backend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::new(&BackendConfig {
            root_dir: dir.path().to_path_buf(),
        })
        .unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_crud() {
        let (dir, store) = backend();

        store
            .put("genres", "jazz", json!({"name": "Jazz"}))
            .await
            .unwrap();
        assert!(dir.path().join("genres").join("jazz.json").exists());

        assert_eq!(
            store.get("genres", "jazz").await.unwrap(),
            Some(json!({"name": "Jazz"}))
        );
        assert_eq!(store.get("genres", "rock").await.unwrap(), None);

        store
            .put("genres", "blues", json!({"name": "Blues"}))
            .await
            .unwrap();
        let ids: Vec<_> = store
            .list("genres")
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["blues".to_string(), "jazz".to_string()]);

        assert!(store.delete("genres", "jazz").await.unwrap());
        assert!(!store.delete("genres", "jazz").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_missing_collection() {
        let (_dir, store) = backend();
        assert!(store.list("albums").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_entity() {
        let (dir, store) = backend();
        fs::create_dir_all(dir.path().join("albums")).unwrap();
        fs::write(dir.path().join("albums").join("1.json"), "{not json").unwrap();

        assert!(matches!(
            store.get("albums", "1").await,
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, store) = backend();
        assert!(matches!(
            store.get("..", "passwd").await,
            Err(Error::InvalidName(_))
        ));
    }
}
