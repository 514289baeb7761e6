//! Integration tests for SqliteCursorStore
//!
//! Each test creates a fresh in-memory database to keep tests isolated.

use tributary_core::ports::ICursorStore;
use tributary_cursor::{CursorError, SqliteCursorStore};

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteCursorStore {
    SqliteCursorStore::in_memory()
        .await
        .expect("Failed to create in-memory database")
}

// ============================================================================
// Basic operations
// ============================================================================

#[tokio::test]
async fn test_get_missing_key() {
    let store = setup().await;
    assert!(store.get("local-file-system-metadata-a.log").await.unwrap().is_none());
}

#[tokio::test]
async fn test_put_overwrites() {
    let store = setup().await;
    store.put("sftpSource/a.txt", "1000").await.unwrap();
    store.put("sftpSource/a.txt", "2000").await.unwrap();

    assert_eq!(
        store.get("sftpSource/a.txt").await.unwrap().as_deref(),
        Some("2000")
    );
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_prefixes_partition_keys() {
    let store = setup().await;
    store.put("sftpSource/a.txt", "1").await.unwrap();
    store.put("s3Source/a.txt", "2").await.unwrap();

    assert_eq!(store.get("sftpSource/a.txt").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.get("s3Source/a.txt").await.unwrap().as_deref(), Some("2"));
}

#[tokio::test]
async fn test_remove_returns_previous_value() {
    let store = setup().await;
    store.put("k", "5").await.unwrap();

    assert_eq!(store.remove("k").await.unwrap().as_deref(), Some("5"));
    assert!(store.remove("k").await.unwrap().is_none());
    assert!(store.get("k").await.unwrap().is_none());
}

// ============================================================================
// Atomic operations
// ============================================================================

#[tokio::test]
async fn test_put_if_absent() {
    let store = setup().await;
    assert!(store.supports_compare_and_set());

    assert!(store.put_if_absent("k", "1").await.unwrap().is_none());
    assert_eq!(store.put_if_absent("k", "2").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
}

#[tokio::test]
async fn test_replace_guards_on_expected_value() {
    let store = setup().await;
    store.put("k", "1").await.unwrap();

    assert!(!store.replace("k", "9", "2").await.unwrap());
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));

    assert!(store.replace("k", "1", "2").await.unwrap());
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));

    assert!(!store.replace("absent", "1", "2").await.unwrap());
}

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("cursor.db");

    {
        let store = SqliteCursorStore::open(&path).await.unwrap();
        store.put("k", "42").await.unwrap();
        store.close().await;
    }

    let store = SqliteCursorStore::open(&path).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("42"));
}

#[tokio::test]
async fn test_unopenable_path_is_a_connection_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let result = SqliteCursorStore::open(&blocker.join("cursor.db")).await;
    assert!(matches!(result, Err(CursorError::ConnectionFailed(_))));
}
