//! In-memory [`DocumentStore`] for tests that should not need a MongoDB server.
//!
//! Clones share state, so a test can keep one handle for assertions while
//! the orchestrator owns another.

use crate::config::Credentials;
use crate::store::{DocumentStore, InsertOutcome, StoreError};
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Hosts containing this string fail to open, to exercise connection errors.
pub const UNREACHABLE_HOST: &str = "unreachable";

#[derive(Debug, Default)]
struct MemoryState {
    database: String,
    collections: BTreeMap<String, Vec<Document>>,
    failing_collections: HashSet<String>,
    fail_drops: bool,
    drops: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn named(database: &str) -> Self {
        let store = Self::default();
        store.state().database = database.to_string();
        store
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Point this handle (and its clones) at another database, keeping data.
    pub fn rename(&self, database: &str) {
        self.state().database = database.to_string();
    }

    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        self.state()
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    /// Make every later insert into `collection` fail.
    pub fn fail_inserts_into(&self, collection: &str) {
        self.state()
            .failing_collections
            .insert(collection.to_string());
    }

    pub fn fail_drops(&self) {
        self.state().fail_drops = true;
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.state().collections.keys().cloned().collect()
    }

    pub fn drop_count(&self) -> usize {
        self.state().drops
    }

    /// True when both handles share the same state.
    pub fn same_store(&self, other: &MemoryStore) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn open(
        uri: &str,
        database: &str,
        _credentials: Option<&Credentials>,
    ) -> Result<Self, StoreError> {
        if uri.contains(UNREACHABLE_HOST) {
            return Err(StoreError::Backend(format!("cannot reach {uri}")));
        }
        Ok(Self::named(database))
    }

    fn database_name(&self) -> String {
        self.state().database.clone()
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state();
        if state.failing_collections.contains(collection) {
            return Err(StoreError::Backend(format!(
                "insert into '{collection}' rejected"
            )));
        }

        let mut inserted_ids = Vec::with_capacity(documents.len());
        let stored = state.collections.entry(collection.to_string()).or_default();
        for document in documents {
            let mut document = document.clone();
            let id = match document.get("_id") {
                Some(id) => id.clone(),
                None => {
                    let id = Bson::ObjectId(ObjectId::new());
                    document.insert("_id", id.clone());
                    id
                }
            };
            inserted_ids.push(id);
            stored.push(document);
        }

        Ok(InsertOutcome { inserted_ids })
    }

    async fn drop_database(&self) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.fail_drops {
            return Err(StoreError::Backend("drop rejected".to_string()));
        }
        state.collections.clear();
        state.drops += 1;
        Ok(())
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        Ok(self.documents(collection).len() as u64)
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        Ok(self.documents(collection))
    }
}
