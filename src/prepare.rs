//! The test-prepare orchestrator.
//!
//! `start` connects, clears the test database and imports fixtures; `end`
//! clears again. Imported records stay reachable by fixture name.

use crate::config::{ConfigError, PrepareConfig, PrepareOptions};
use crate::connect::Session;
use crate::error::{FixtureFailure, TestPrepareError};
use crate::fixture::{self, FixtureDescriptor};
use crate::guard::{self, ClearOutcome};
use crate::log::{LogSink, PrepareLog};
use crate::store::DocumentStore;
use bson::{Bson, Document};
use futures::future::join_all;
use mongodb::Database;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// Build an orchestrator backed by MongoDB.
///
/// `None` fails the same way missing required fields do.
pub fn test_prepare(options: Option<PrepareOptions>) -> Result<TestPrepare, ConfigError> {
    let options = options.ok_or(ConfigError::MissingOptions)?;
    TestPrepare::new(options)
}

/// Historical property name under which a fixture's result was exposed.
pub fn fixture_key(name: &str) -> String {
    format!("fixture_{name}")
}

/// Lifecycle of one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareState {
    Uninitialized,
    Connected,
    Cleared,
    Populated,
}

/// Records inserted for one fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFixture {
    pub name: String,
    pub collection: String,
    /// Inserted documents, with their `_id` filled in.
    pub records: Vec<Document>,
    pub inserted_ids: Vec<Bson>,
}

impl ImportedFixture {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Orchestrates connect, clear and fixture import for one test run.
pub struct TestPrepare<S = Database> {
    config: PrepareConfig,
    session: Session<S>,
    log: PrepareLog,
    fixtures: HashMap<String, ImportedFixture>,
    state: PrepareState,
}

impl TestPrepare<Database> {
    pub fn new(options: PrepareOptions) -> Result<Self, ConfigError> {
        Self::from_options(options)
    }
}

impl<S: DocumentStore> TestPrepare<S> {
    /// Validate `options` and create a session with a fresh database name.
    pub fn from_options(options: PrepareOptions) -> Result<Self, ConfigError> {
        Self::build(options, None, LogSink::Stdout)
    }

    /// Like [`TestPrepare::from_options`], with verbose lines (the banner
    /// included) going to `sink`.
    pub fn from_options_with_sink(
        options: PrepareOptions,
        sink: LogSink,
    ) -> Result<Self, ConfigError> {
        Self::build(options, None, sink)
    }

    /// Reuse an existing connection instead of opening one. Its database name
    /// becomes the test database name on the next `connect`.
    pub fn with_connection(options: PrepareOptions, connection: S) -> Result<Self, ConfigError> {
        Self::build(options, Some(connection), LogSink::Stdout)
    }

    pub fn with_connection_and_sink(
        options: PrepareOptions,
        connection: S,
        sink: LogSink,
    ) -> Result<Self, ConfigError> {
        Self::build(options, Some(connection), sink)
    }

    fn build(
        options: PrepareOptions,
        connection: Option<S>,
        sink: LogSink,
    ) -> Result<Self, ConfigError> {
        let config = options.validate()?;
        let session = Session::new(&config.mongo_host, connection);
        let log = PrepareLog::with_sink(config.verbose, sink);

        let prepare = Self {
            config,
            session,
            log,
            fixtures: HashMap::new(),
            state: PrepareState::Uninitialized,
        };
        prepare.log_configuration();
        Ok(prepare)
    }

    /// Replace the verbose line writer.
    pub fn with_log(mut self, log: PrepareLog) -> Self {
        self.log = log;
        self
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.log.set_verbose(verbose);
    }

    /// Print the configuration banner when verbose.
    pub fn log_configuration(&self) {
        self.log.banner(
            &self.config,
            self.session.test_database(),
            self.session.connection_uri(),
        );
    }

    pub fn config(&self) -> &PrepareConfig {
        &self.config
    }

    pub fn test_database(&self) -> &str {
        self.session.test_database()
    }

    pub fn connection_uri(&self) -> &str {
        self.session.connection_uri()
    }

    pub fn connection(&self) -> Option<&S> {
        self.session.connection()
    }

    pub fn state(&self) -> PrepareState {
        self.state
    }

    /// Result of the last import of `name`.
    pub fn fixture(&self, name: &str) -> Option<&ImportedFixture> {
        self.fixtures.get(name)
    }

    pub fn fixture_records(&self, name: &str) -> Option<Vec<Document>> {
        self.fixture(name).map(|imported| imported.records.clone())
    }

    /// Every stored result, keyed by fixture name.
    pub fn imported_fixtures(&self) -> &HashMap<String, ImportedFixture> {
        &self.fixtures
    }

    /// Connect, clear the test database, then import `fixture_names`.
    pub async fn start(&mut self, fixture_names: &[&str]) -> Result<(), TestPrepareError> {
        self.log.line("The test will be prepared now.");
        self.connect().await?;
        self.clear().await?;
        self.import_fixtures(fixture_names).await?;
        Ok(())
    }

    /// Clear the test database.
    pub async fn end(&mut self) -> Result<(), TestPrepareError> {
        self.clear().await?;
        Ok(())
    }

    pub async fn connect(&mut self) -> Result<(), TestPrepareError> {
        self.session.connect(&self.config, &self.log).await?;
        if self.state == PrepareState::Uninitialized {
            self.state = PrepareState::Connected;
        }
        Ok(())
    }

    /// Drop the test database if the guard allows it.
    pub async fn clear(&mut self) -> Result<ClearOutcome, TestPrepareError> {
        let outcome = guard::clear(&self.session, self.config.guard_policy, &self.log).await?;
        if outcome.dropped() {
            self.state = PrepareState::Cleared;
        }
        Ok(outcome)
    }

    /// Import every fixture concurrently.
    ///
    /// All imports run to completion even when some fail; the failures are
    /// then reported together as [`TestPrepareError::Import`]. Fixtures that
    /// succeeded are stored either way. Returns the imported names in input
    /// order.
    pub async fn import_fixtures(&mut self, names: &[&str]) -> Result<Vec<String>, TestPrepareError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let this = &*self;
        let outcomes = join_all(names.iter().map(|name| async move {
            (name.to_string(), this.load_fixture(name, std::convert::identity).await)
        }))
        .await;

        let mut loaded = Vec::new();
        let mut failures = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(imported) => {
                    self.store_fixture(imported);
                    loaded.push(name);
                }
                Err(error) => failures.push(FixtureFailure {
                    fixture: name,
                    error: Box::new(error),
                }),
            }
        }

        if failures.is_empty() {
            Ok(loaded)
        } else {
            Err(TestPrepareError::Import { failures })
        }
    }

    /// Import one fixture and store its result.
    pub async fn import_fixture(&mut self, name: &str) -> Result<String, TestPrepareError> {
        self.import_fixture_with(name, std::convert::identity).await
    }

    /// Import one fixture, letting `transform` rewrite the parsed descriptor
    /// before its records are inserted.
    pub async fn import_fixture_with<F>(
        &mut self,
        name: &str,
        transform: F,
    ) -> Result<String, TestPrepareError>
    where
        F: FnOnce(FixtureDescriptor) -> FixtureDescriptor + Send,
    {
        let imported = self.load_fixture(name, transform).await?;
        self.store_fixture(imported);
        Ok(name.to_string())
    }

    fn store_fixture(&mut self, imported: ImportedFixture) {
        if self.fixtures.contains_key(&imported.name) {
            debug!("Replacing stored result of fixture [{}]", imported.name);
        }
        self.fixtures.insert(imported.name.clone(), imported);
        self.state = PrepareState::Populated;
    }

    async fn load_fixture<F>(&self, name: &str, transform: F) -> Result<ImportedFixture, TestPrepareError>
    where
        F: FnOnce(FixtureDescriptor) -> FixtureDescriptor + Send,
    {
        let result = self.insert_fixture(name, transform).await;
        match &result {
            Ok(imported) => {
                info!(
                    "Fixture [{}] inserted {} records into '{}'",
                    name,
                    imported.len(),
                    imported.collection
                );
                self.log.line(format!("Fixture [{name}] was loaded."));
            }
            Err(e) => {
                error!("Fixture [{}] failed: {}", name, e);
                self.log.line(format!("Fixture [{name}] could not be loaded: {e}"));
            }
        }
        result
    }

    async fn insert_fixture<F>(&self, name: &str, transform: F) -> Result<ImportedFixture, TestPrepareError>
    where
        F: FnOnce(FixtureDescriptor) -> FixtureDescriptor + Send,
    {
        let connection = self
            .session
            .connection()
            .ok_or(TestPrepareError::NotConnected)?;

        let descriptor = fixture::read_descriptor(&self.config.fixtures_path, name).await?;
        let descriptor = transform(descriptor);
        let collection = descriptor.collection_name().to_string();
        let mut records = descriptor.documents()?;

        // MongoDB rejects empty bulk inserts
        let inserted_ids = if records.is_empty() {
            Vec::new()
        } else {
            connection
                .insert_many(&collection, &records)
                .await
                .map_err(|source| TestPrepareError::Insert {
                    fixture: name.to_string(),
                    collection: collection.clone(),
                    source,
                })?
                .inserted_ids
        };

        for (record, id) in records.iter_mut().zip(&inserted_ids) {
            if !record.contains_key("_id") {
                record.insert("_id", id.clone());
            }
        }

        Ok(ImportedFixture {
            name: name.to_string(),
            collection,
            records,
            inserted_ids,
        })
    }
}
