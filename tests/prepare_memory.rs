//! Orchestrator tests over the bundled fixture files, backed by the in-memory store.

use mongo_test_prepare::testing::MemoryStore;
use mongo_test_prepare::{
    DocumentStore, PrepareLog, PrepareOptions, PrepareState, TestPrepare, TestPrepareError,
    SAFETY_MARKER,
};
use std::path::PathBuf;

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn memory_prepare() -> TestPrepare<MemoryStore> {
    TestPrepare::from_options(PrepareOptions::new("memory://local", fixtures_path())).unwrap()
}

#[tokio::test]
async fn test_full_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let (log, lines) = PrepareLog::captured(true);
    let mut prepare = memory_prepare().with_log(log);
    assert!(prepare.test_database().contains(SAFETY_MARKER));

    prepare.start(&["people", "orders"]).await?;
    assert_eq!(prepare.state(), PrepareState::Populated);

    let store = prepare.connection().cloned().ok_or("not connected")?;
    assert_eq!(store.database_name(), prepare.test_database());
    assert_eq!(store.count_documents("people").await?, 2);
    assert_eq!(store.count_documents("orders").await?, 1);

    let orders = prepare.fixture("orders").ok_or("orders not imported")?;
    let order = &orders.records[0];
    assert_eq!(
        order.get_object_id("_id")?.to_hex(),
        "65a1f0c2e4b0a1b2c3d4e5f6"
    );
    assert_eq!(order.get_str("item")?, "Longclaw");
    assert!(order.get_datetime("placed_at").is_ok());

    prepare.end().await?;
    assert_eq!(prepare.state(), PrepareState::Cleared);
    assert_eq!(store.count_documents("people").await?, 0);
    assert!(store.find_all("orders").await?.is_empty());

    // fixture log lines may arrive in either order
    assert!(lines.contains("Test Prepare => Fixture [people] was loaded."));
    assert!(lines.contains("Test Prepare => Fixture [orders] was loaded."));
    Ok(())
}

#[tokio::test]
async fn test_empty_fixture_inserts_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut prepare = memory_prepare();
    prepare.start(&["empty"]).await?;

    let empty = prepare.fixture("empty").ok_or("empty not imported")?;
    assert!(empty.is_empty());
    assert_eq!(empty.collection, "nothing");
    let store = prepare.connection().ok_or("not connected")?;
    assert!(store.collection_names().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_fixture_is_reported_with_siblings_loaded() {
    let mut prepare = memory_prepare();

    let err = prepare
        .start(&["people", "missing-fixture"])
        .await
        .unwrap_err();

    assert!(matches!(err, TestPrepareError::Import { .. }));
    assert_eq!(err.failed_fixtures(), vec!["missing-fixture"]);
    assert!(err.to_string().contains("missing-fixture.json"));
    assert_eq!(prepare.fixture("people").map(|f| f.len()), Some(2));
}

#[tokio::test]
async fn test_restart_reuses_connection_and_reseeds() -> Result<(), Box<dyn std::error::Error>> {
    let mut prepare = memory_prepare();
    prepare.start(&["people"]).await?;
    let database = prepare.test_database().to_string();
    let store = prepare.connection().cloned().ok_or("not connected")?;

    prepare.start(&["people"]).await?;

    assert_eq!(prepare.test_database(), database);
    assert!(prepare
        .connection()
        .ok_or("not connected")?
        .same_store(&store));
    // second start cleared the first seed before importing again
    assert_eq!(store.documents("people").len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_instances_do_not_share_state() -> Result<(), Box<dyn std::error::Error>> {
    let mut first = memory_prepare();
    let mut second = memory_prepare();

    first.start(&["people"]).await?;
    second.start(&[]).await?;

    assert_ne!(first.test_database(), second.test_database());
    assert!(second.fixture("people").is_none());
    let first_store = first.connection().ok_or("not connected")?;
    let second_store = second.connection().ok_or("not connected")?;
    assert!(!first_store.same_store(second_store));

    second.end().await?;
    assert_eq!(first_store.documents("people").len(), 2);
    Ok(())
}
