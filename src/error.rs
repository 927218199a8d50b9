//! Error types for the test-prepare orchestrator.

use crate::config::ConfigError;
use crate::fixture::FixtureError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors that can occur while connecting, seeding or clearing a test database.
#[derive(Error, Debug)]
pub enum TestPrepareError {
    /// Options were rejected before the orchestrator was built.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Opening or verifying the MongoDB connection failed.
    #[error("Failed to connect to {uri}: {source}")]
    Connect {
        uri: String,
        #[source]
        source: StoreError,
    },

    /// Fixture file missing, unreadable or malformed.
    #[error(transparent)]
    Fixture(#[from] FixtureError),

    /// Bulk insert of a fixture's records failed.
    #[error("Failed to insert fixture [{fixture}] into collection '{collection}': {source}")]
    Insert {
        fixture: String,
        collection: String,
        #[source]
        source: StoreError,
    },

    /// Dropping the test database failed.
    #[error("Failed to drop database '{database}': {source}")]
    Drop {
        database: String,
        #[source]
        source: StoreError,
    },

    /// A fixture was imported before `connect` succeeded.
    #[error("Not connected: call start() or connect() before importing fixtures")]
    NotConnected,

    /// One or more fixtures of a batch failed. The remaining fixtures of the
    /// batch were still imported.
    #[error("{} fixture import(s) failed: {}", .failures.len(), summarize(.failures))]
    Import { failures: Vec<FixtureFailure> },
}

/// One failed fixture of a batch import.
#[derive(Debug)]
pub struct FixtureFailure {
    pub fixture: String,
    pub error: Box<TestPrepareError>,
}

impl std::fmt::Display for FixtureFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.fixture, self.error)
    }
}

fn summarize(failures: &[FixtureFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl TestPrepareError {
    /// Names of the fixtures that failed, for aggregate import errors.
    pub fn failed_fixtures(&self) -> Vec<&str> {
        match self {
            TestPrepareError::Import { failures } => {
                failures.iter().map(|f| f.fixture.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_error_lists_every_failure() {
        let err = TestPrepareError::Import {
            failures: vec![
                FixtureFailure {
                    fixture: "people".to_string(),
                    error: Box::new(TestPrepareError::NotConnected),
                },
                FixtureFailure {
                    fixture: "orders".to_string(),
                    error: Box::new(TestPrepareError::Insert {
                        fixture: "orders".to_string(),
                        collection: "orders".to_string(),
                        source: StoreError::Backend("duplicate key".to_string()),
                    }),
                },
            ],
        };

        let message = err.to_string();
        assert!(message.starts_with("2 fixture import(s) failed"));
        assert!(message.contains("[people]"));
        assert!(message.contains("duplicate key"));
        assert_eq!(err.failed_fixtures(), vec!["people", "orders"]);
    }

    #[test]
    fn test_failed_fixtures_empty_for_other_errors() {
        assert!(TestPrepareError::NotConnected.failed_fixtures().is_empty());
    }
}
