//! Drop guard: only the instance's own test database is ever dropped.

use crate::config::GuardPolicy;
use crate::connect::{Session, SAFETY_MARKER};
use crate::error::TestPrepareError;
use crate::log::PrepareLog;
use crate::store::DocumentStore;
use tracing::{debug, info, warn};

/// What `clear` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The database was dropped.
    Dropped { database: String },
    /// The live database did not pass the guard and was left alone.
    Skipped { live: String, recorded: String },
    /// There is no connection to clear.
    NotConnected,
}

impl ClearOutcome {
    pub fn dropped(&self) -> bool {
        matches!(self, ClearOutcome::Dropped { .. })
    }
}

/// True when `name` carries the safety marker.
pub fn is_test_database(name: &str) -> bool {
    name.contains(SAFETY_MARKER)
}

/// Whether the live database may be dropped under `policy`.
pub fn may_drop(policy: GuardPolicy, recorded: &str, live: &str) -> bool {
    match policy {
        GuardPolicy::ExactName => live == recorded,
        GuardPolicy::ContainsMarker => is_test_database(live),
    }
}

/// Drop the session's database if it passes the guard.
pub async fn clear<S: DocumentStore>(
    session: &Session<S>,
    policy: GuardPolicy,
    log: &PrepareLog,
) -> Result<ClearOutcome, TestPrepareError> {
    let Some(connection) = session.connection() else {
        debug!("Nothing to clear: not connected");
        return Ok(ClearOutcome::NotConnected);
    };

    let recorded = session.test_database();
    let live = connection.database_name();

    if !may_drop(policy, recorded, &live) {
        warn!(
            "Refusing to drop database '{}': recorded test database is '{}' ({:?})",
            live, recorded, policy
        );
        return Ok(ClearOutcome::Skipped {
            live,
            recorded: recorded.to_string(),
        });
    }

    if !is_test_database(recorded) {
        warn!(
            "Test database '{}' does not contain '{}'; dropping it anyway",
            recorded, SAFETY_MARKER
        );
        log.line(format!(
            "Warning: the database [{recorded}] does not contain '{SAFETY_MARKER}'."
        ));
    }

    connection
        .drop_database()
        .await
        .map_err(|source| TestPrepareError::Drop {
            database: live.clone(),
            source,
        })?;

    info!("Dropped test database '{}'", live);
    log.line(format!("The database [{live}] is now clear."));

    Ok(ClearOutcome::Dropped { database: live })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use bson::doc;

    #[test]
    fn test_may_drop_exact_name() {
        assert!(may_drop(GuardPolicy::ExactName, "my_test_prepare_1", "my_test_prepare_1"));
        assert!(!may_drop(GuardPolicy::ExactName, "my_test_prepare_1", "my_test_prepare_2"));
        assert!(!may_drop(GuardPolicy::ExactName, "my_test_prepare_1", "production"));
    }

    #[test]
    fn test_may_drop_contains_marker() {
        assert!(may_drop(GuardPolicy::ContainsMarker, "anything", "my_test_prepare_2"));
        assert!(!may_drop(GuardPolicy::ContainsMarker, "my_test_prepare_1", "production"));
    }

    #[tokio::test]
    async fn test_clear_without_connection_is_noop() {
        let session: Session<MemoryStore> = Session::new("memory://local", None);
        let outcome = clear(&session, GuardPolicy::ExactName, &PrepareLog::new(false))
            .await
            .unwrap();
        assert_eq!(outcome, ClearOutcome::NotConnected);
    }

    #[tokio::test]
    async fn test_clear_mismatched_database_keeps_data() {
        let store = MemoryStore::named("production");
        store.seed("people", vec![doc! { "name": "Jhon Snow" }]);
        let session = Session::new("memory://local", Some(store.clone()));

        let outcome = clear(&session, GuardPolicy::ExactName, &PrepareLog::new(false))
            .await
            .unwrap();

        assert!(!outcome.dropped());
        assert_eq!(store.drop_count(), 0);
        assert_eq!(store.documents("people").len(), 1);
    }

    #[tokio::test]
    async fn test_clear_unmarked_database_under_marker_policy_is_noop() {
        let store = MemoryStore::named("production");
        store.seed("people", vec![doc! { "name": "Jhon Snow" }]);
        let session = Session::new("memory://local", Some(store.clone()));

        let outcome = clear(&session, GuardPolicy::ContainsMarker, &PrepareLog::new(false))
            .await
            .unwrap();

        assert!(!outcome.dropped());
        assert_eq!(store.documents("people").len(), 1);
    }

    #[tokio::test]
    async fn test_clear_drops_unmarked_adopted_database_with_warning() {
        let store = MemoryStore::named("integration");
        store.seed("people", vec![doc! { "name": "Jhon Snow" }]);
        let mut session = Session::new("memory://local", Some(store.clone()));
        let config = crate::config::PrepareOptions::new("memory://local", "fixtures")
            .validate()
            .unwrap();
        session.connect(&config, &PrepareLog::new(false)).await.unwrap();
        let (log, lines) = PrepareLog::captured(true);

        let outcome = clear(&session, GuardPolicy::ExactName, &log).await.unwrap();

        assert_eq!(
            outcome,
            ClearOutcome::Dropped {
                database: "integration".to_string()
            }
        );
        assert_eq!(store.drop_count(), 1);
        assert!(store.documents("people").is_empty());
        assert!(lines.contains(
            "Test Prepare => Warning: the database [integration] does not contain 'test_prepare'."
        ));
        assert!(lines.contains("Test Prepare => The database [integration] is now clear."));
    }

    #[tokio::test]
    async fn test_clear_marked_database_has_no_warning() {
        let store = MemoryStore::named("my_test_prepare_database_1");
        let mut session = Session::new("memory://local", Some(store));
        let config = crate::config::PrepareOptions::new("memory://local", "fixtures")
            .validate()
            .unwrap();
        session.connect(&config, &PrepareLog::new(false)).await.unwrap();
        let (log, lines) = PrepareLog::captured(true);

        clear(&session, GuardPolicy::ExactName, &log).await.unwrap();

        assert!(!lines.lines().iter().any(|line| line.contains("Warning")));
    }

    #[tokio::test]
    async fn test_clear_drop_failure_propagates() {
        let store = MemoryStore::named("production");
        store.fail_drops();
        let mut session = Session::new("memory://local", Some(store));
        let config = crate::config::PrepareOptions::new("memory://local", "fixtures")
            .validate()
            .unwrap();
        // adopt the connection's name so the guard lets the drop through
        session.connect(&config, &PrepareLog::new(false)).await.unwrap();

        let err = clear(&session, GuardPolicy::ExactName, &PrepareLog::new(false))
            .await
            .unwrap_err();
        assert!(matches!(err, TestPrepareError::Drop { .. }));
    }
}
