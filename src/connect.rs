//! Per-instance session state and the connection manager.

use crate::config::PrepareConfig;
use crate::error::TestPrepareError;
use crate::log::{mask_connection_password, PrepareLog};
use crate::store::DocumentStore;
use tracing::{debug, info};

/// Substring every generated test database name carries. The drop guard
/// relies on it to tell test databases apart from anything else.
pub const SAFETY_MARKER: &str = "test_prepare";

const DATABASE_PREFIX: &str = "my_test_prepare_database";

/// Generate a unique test database name.
///
/// `my_test_prepare_database_<unix millis>_<8 hex chars>`; the random suffix
/// separates instances created within the same millisecond.
pub fn generate_test_database_name() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{DATABASE_PREFIX}_{millis}_{}", &suffix[..8])
}

/// `<host>/<database>`
pub fn compose_connection_uri(host: &str, database: &str) -> String {
    format!("{host}/{database}")
}

/// Mutable state owned by one orchestrator.
#[derive(Debug)]
pub struct Session<S> {
    test_database: String,
    connection_uri: String,
    connection: Option<S>,
}

impl<S: DocumentStore> Session<S> {
    /// A fresh session with a newly generated database name.
    pub fn new(host: &str, connection: Option<S>) -> Self {
        let test_database = generate_test_database_name();
        let connection_uri = compose_connection_uri(host, &test_database);
        Self {
            test_database,
            connection_uri,
            connection,
        }
    }

    pub fn test_database(&self) -> &str {
        &self.test_database
    }

    pub fn connection_uri(&self) -> &str {
        &self.connection_uri
    }

    pub fn connection(&self) -> Option<&S> {
        self.connection.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open the connection if there is none yet.
    ///
    /// With a live connection nothing is opened; the connection's database
    /// name replaces the generated one instead, since the generated name was
    /// never applied to a handle the caller supplied.
    pub async fn connect(
        &mut self,
        config: &PrepareConfig,
        log: &PrepareLog,
    ) -> Result<(), TestPrepareError> {
        if let Some(connection) = &self.connection {
            let live = connection.database_name();
            if live != self.test_database {
                debug!(
                    "Reusing connection on database '{}' instead of '{}'",
                    live, self.test_database
                );
                self.connection_uri = compose_connection_uri(&config.mongo_host, &live);
                self.test_database = live;
                log.line(format!(
                    "Mongo is connected on ({})!",
                    mask_connection_password(&self.connection_uri)
                ));
            }
            return Ok(());
        }

        let masked_uri = mask_connection_password(&self.connection_uri);
        debug!("Connecting to {}", masked_uri);

        let connection = S::open(
            &self.connection_uri,
            &self.test_database,
            config.credentials.as_ref(),
        )
        .await
        .map_err(|source| TestPrepareError::Connect {
            uri: masked_uri.clone(),
            source,
        })?;

        info!("Connected to test database '{}'", self.test_database);
        log.line(format!("Mongo is connected on ({masked_uri})!"));

        self.connection = Some(connection);
        Ok(())
    }
}
