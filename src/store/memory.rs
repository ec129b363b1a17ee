// src/store/memory.rs - In-process document store with optional JSON persistence

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DocumentId, DocumentStore, Filter, StoreError, StoreResult, Update, ID_FIELD};
use crate::types::now_millis;

/// Document store held in memory, one JSON file per collection when persistence is enabled
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    data_dir: Option<PathBuf>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            data_dir: None,
            available: AtomicBool::new(true),
        }
    }

    /// Store that mirrors every write to `<data_dir>/<collection>.json`
    pub fn with_persistence(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::new()
        }
    }

    /// Load previously persisted collections from disk
    pub async fn load(&self) -> StoreResult<usize> {
        let Some(dir) = &self.data_dir else {
            return Ok(0);
        };

        tokio::fs::create_dir_all(dir).await?;

        let mut loaded = 0;
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut collections = self.collections.write().await;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Vec<Value>>(&content) {
                Ok(docs) => {
                    debug!("Loaded {} documents into '{}'", docs.len(), name);
                    loaded += docs.len();
                    collections.insert(name, docs);
                }
                Err(e) => warn!("Skipping unreadable collection file {}: {}", path.display(), e),
            }
        }

        info!("Document store loaded {} documents from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Toggle reachability; an unavailable store fails every call
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("document store is not reachable".to_string()))
        }
    }

    async fn persist(&self, collection: &str, docs: &[Value]) -> StoreResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };

        let path = dir.join(format!("{}.json", collection));
        let tmp = dir.join(format!("{}.json.tmp", collection));
        let content = serde_json::to_string_pretty(docs)?;

        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn stamp_new(mut doc: Value) -> (DocumentId, Value) {
        let id = Uuid::new_v4().to_string();
        let now = now_millis();

        if !doc.is_object() {
            doc = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut doc {
            map.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            map.insert("createdAt".to_string(), Value::from(now));
            map.insert("updatedAt".to_string(), Value::from(now));
        }
        (id, doc)
    }

    fn touch(doc: &mut Value) {
        if let Value::Object(map) = doc {
            map.insert("updatedAt".to_string(), Value::from(now_millis()));
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn insert(&self, collection: &str, doc: Value) -> StoreResult<DocumentId> {
        self.check_available()?;
        let (id, doc) = Self::stamp_new(doc);

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        docs.push(doc);
        self.persist(collection, docs).await?;

        Ok(id)
    }

    async fn insert_if_absent(&self, collection: &str, filter: &Filter, doc: Value) -> StoreResult<Option<DocumentId>> {
        self.check_available()?;

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| filter.matches(d)) {
            return Ok(None);
        }

        let (id, doc) = Self::stamp_new(doc);
        docs.push(doc);
        self.persist(collection, docs).await?;

        Ok(Some(id))
    }

    async fn get_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Value>> {
        self.check_available()?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)))
            .cloned())
    }

    async fn get_many(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>> {
        self.check_available()?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<Option<Value>> {
        self.check_available()?;

        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(doc) = docs.iter_mut().find(|d| filter.matches(d)) else {
            return Ok(None);
        };

        update.apply(doc);
        Self::touch(doc);
        let post_image = doc.clone();
        self.persist(collection, docs).await?;

        Ok(Some(post_image))
    }

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<usize> {
        self.check_available()?;

        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut modified = 0;
        for doc in docs.iter_mut().filter(|d| filter.matches(d)) {
            update.apply(doc);
            Self::touch(doc);
            modified += 1;
        }
        if modified > 0 {
            self.persist(collection, docs).await?;
        }

        Ok(modified)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.delete_many(collection, &Filter::by_id(id)).await.map(|n| n > 0)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        self.check_available()?;

        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        let removed = before - docs.len();
        if removed > 0 {
            self.persist(collection, docs).await?;
        }

        Ok(removed)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        self.check_available()?;

        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count())
            .unwrap_or(0))
    }
}
