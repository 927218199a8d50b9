//! Document database seam used by the orchestrator.
//!
//! [`mongodb::Database`] is the production implementation. The in-memory
//! [`crate::testing::MemoryStore`] implements the same trait for unit tests.

use crate::config::Credentials;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, Credential};
use mongodb::{Client, Collection, Database};
use std::time::Duration;
use thiserror::Error;

/// Authentication database used when neither the URI nor the options name one.
pub const DEFAULT_AUTH_SOURCE: &str = "admin";

/// Errors reported by a [`DocumentStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// MongoDB connection or query error.
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    /// Error from a non-MongoDB backend.
    #[error("{0}")]
    Backend(String),
}

/// Result of a bulk insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    /// `_id` of every inserted document, in insertion order.
    pub inserted_ids: Vec<Bson>,
}

/// A handle on one database of a document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a handle on `database` through `uri` and verify it with a round-trip.
    async fn open(
        uri: &str,
        database: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Self, StoreError>
    where
        Self: Sized;

    /// Name of the database this handle currently points at.
    fn database_name(&self) -> String;

    /// Insert all documents into `collection` in one bulk operation.
    async fn insert_many(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<InsertOutcome, StoreError>;

    /// Drop the whole database.
    async fn drop_database(&self) -> Result<(), StoreError>;

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError>;

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;
}

/// Install `credentials` (when given) and settle the authentication database.
///
/// An `authSource` in the URI wins. Otherwise the driver's fallback to the
/// database in the URI path is replaced by [`DEFAULT_AUTH_SOURCE`], since a
/// freshly generated database has no users of its own. Sources the driver
/// picked for other reasons (e.g. `$external`) are kept.
pub fn apply_credentials(
    options: &mut ClientOptions,
    uri: &str,
    database: &str,
    credentials: Option<&Credentials>,
) {
    if let Some(credentials) = credentials {
        let mechanism = options
            .credential
            .as_ref()
            .and_then(|credential| credential.mechanism.clone());
        options.credential = Some(
            Credential::builder()
                .username(credentials.user.clone())
                .password(credentials.password.clone())
                .mechanism(mechanism)
                .build(),
        );
    }

    let Some(credential) = options.credential.as_mut() else {
        return;
    };
    match uri_auth_source(uri) {
        Some(source) => credential.source = Some(source),
        None => {
            let from_path = credential
                .source
                .as_deref()
                .map_or(true, |source| source == database);
            if from_path {
                credential.source = Some(DEFAULT_AUTH_SOURCE.to_string());
            }
        }
    }
}

/// Value of the `authSource` URI option, if present.
fn uri_auth_source(uri: &str) -> Option<String> {
    let (_, query) = uri.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("authSource"))
        .map(|(_, value)| value.to_string())
}

#[async_trait]
impl DocumentStore for Database {
    async fn open(
        uri: &str,
        database: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri).await?;
        // Add connection timeout to prevent hanging
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));
        apply_credentials(&mut options, uri, database, credentials);

        let client = Client::with_options(options)?;
        let database = client.database(database);

        // Test connection
        database.list_collection_names().await?;

        Ok(database)
    }

    fn database_name(&self) -> String {
        self.name().to_string()
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<InsertOutcome, StoreError> {
        let collection: Collection<Document> = self.collection(collection);
        let result = collection.insert_many(documents).await?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);

        Ok(InsertOutcome {
            inserted_ids: ids.into_iter().map(|(_, id)| id).collect(),
        })
    }

    async fn drop_database(&self) -> Result<(), StoreError> {
        self.drop().await?;
        Ok(())
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        let collection: Collection<Document> = self.collection(collection);
        let count = collection.count_documents(doc! {}).await?;
        Ok(count)
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let collection: Collection<Document> = self.collection(collection);
        let cursor = collection.find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }
}
