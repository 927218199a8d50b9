//! Options accepted by [`crate::TestPrepare`] and their validation.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Pointer appended to every configuration error.
pub const SEE_AT: &str = "See the PrepareOptions documentation for the accepted fields.";

/// Errors raised before an orchestrator is constructed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("You have to set options. {}", SEE_AT)]
    MissingOptions,

    #[error("You have to set mongo_host. {}", SEE_AT)]
    MissingHost,

    #[error("You have to set fixtures_path. {}", SEE_AT)]
    MissingFixturesPath,

    /// Config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`PrepareOptions`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How the drop guard decides whether the live database may be dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GuardPolicy {
    /// The live database name must equal the recorded test database name.
    #[default]
    ExactName,
    /// The live database name only has to contain the safety marker.
    ContainsMarker,
}

/// Raw, unvalidated options. Every field may be missing until
/// [`PrepareOptions::validate`] runs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PrepareOptions {
    /// MongoDB host URI without a database path, e.g. `mongodb://localhost:27017`
    pub mongo_host: Option<String>,
    pub mongo_user: Option<String>,
    pub mongo_password: Option<String>,
    /// Directory holding `<fixture>.json` files
    pub fixtures_path: Option<PathBuf>,
    pub verbose: bool,
    pub guard_policy: GuardPolicy,
}

impl PrepareOptions {
    /// Options with the two required fields set.
    pub fn new(mongo_host: impl Into<String>, fixtures_path: impl Into<PathBuf>) -> Self {
        Self {
            mongo_host: Some(mongo_host.into()),
            fixtures_path: Some(fixtures_path.into()),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.mongo_user = Some(user.into());
        self.mongo_password = Some(password.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_guard_policy(mut self, guard_policy: GuardPolicy) -> Self {
        self.guard_policy = guard_policy;
        self
    }

    /// Parse options from a TOML document.
    ///
    /// ```toml
    /// mongo_host = "mongodb://localhost:27017"
    /// fixtures_path = "tests/fixtures"
    /// verbose = true
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub async fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
        Self::from_toml_str(&contents)
    }

    /// Check the required fields and produce the immutable configuration.
    ///
    /// Empty strings count as missing. A password without a user is ignored.
    pub fn validate(self) -> Result<PrepareConfig, ConfigError> {
        let mongo_host = self
            .mongo_host
            .filter(|host| !host.trim().is_empty())
            .ok_or(ConfigError::MissingHost)?;

        let fixtures_path = self
            .fixtures_path
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(ConfigError::MissingFixturesPath)?;

        let credentials = self
            .mongo_user
            .filter(|user| !user.is_empty())
            .map(|user| Credentials {
                user,
                password: self.mongo_password.filter(|password| !password.is_empty()),
            });

        Ok(PrepareConfig {
            mongo_host,
            credentials,
            fixtures_path,
            verbose: self.verbose,
            guard_policy: self.guard_policy,
        })
    }
}

/// Username and optional password handed to the MongoDB driver.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Validated configuration owned by one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareConfig {
    pub mongo_host: String,
    pub credentials: Option<Credentials>,
    pub fixtures_path: PathBuf,
    pub verbose: bool,
    pub guard_policy: GuardPolicy,
}
