//! Behaviour of the persistent session store over the in-memory backend
//!
//! These tests exercise the host-facing contract end to end: upserts, reads,
//! deletes, expiry scans, write failure policies and pool recovery.

use std::collections::HashSet;
use std::sync::Arc;

use sessiondb_core::{
    ConnectionState, DatabaseSettings, Error, MemoryBackend, PersistentSessionStore,
    SessionData, SessionDataStore, SessionRecord, StoreConfig, StoreMetrics,
    WriteFailurePolicy, now_millis,
};

fn settings() -> DatabaseSettings {
    DatabaseSettings::new("memory://sessions", "admin", "admin")
}

fn new_store(backend: &MemoryBackend) -> PersistentSessionStore<MemoryBackend> {
    PersistentSessionStore::new(backend.clone(), &settings(), StoreConfig::default())
}

fn live_session(id: &str) -> SessionData {
    SessionData::new(id, now_millis(), 30 * 60 * 1000)
}

fn expired_session(id: &str) -> SessionData {
    SessionData::new(id, now_millis() - 60_000, 1_000)
}

fn ids(values: &[&str]) -> HashSet<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_round_trip() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    let mut data = live_session("abc");
    data.set_attribute("one", &1).unwrap();
    data.set_attribute("two", &2).unwrap();
    store.store("abc", &data, 0).await.unwrap();

    let loaded = store.load("abc").await.unwrap().unwrap();
    assert_eq!(loaded.id, "abc");
    assert_eq!(loaded.get_attribute::<i32>("one").unwrap(), Some(1));
    assert_eq!(loaded.get_attribute::<i32>("two").unwrap(), Some(2));
    assert_eq!(loaded, data);
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    let mut data = live_session("abc");
    data.set_attribute("cart", &vec!["book", "pen"]).unwrap();

    store.store("abc", &data, 0).await.unwrap();
    let first = store.load("abc").await.unwrap();
    store.store("abc", &data, data.created_at).await.unwrap();
    let second = store.load("abc").await.unwrap();

    assert_eq!(backend.len(), 1);
    assert_eq!(first, second);
    assert_eq!(second, Some(data));
}

#[tokio::test]
async fn test_update_overwrites_expiry() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    let mut data = live_session("abc");
    store.store("abc", &data, 0).await.unwrap();
    let first_expiry = backend.record("abc").unwrap().expiry_at;

    data.touch(data.accessed_at + 10_000);
    store.store("abc", &data, 1).await.unwrap();

    assert_eq!(backend.record("abc").unwrap().expiry_at, first_expiry + 10_000);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    assert!(store.delete("missing").await.unwrap());

    store.store("abc", &live_session("abc"), 0).await.unwrap();
    assert!(store.delete("abc").await.unwrap());
    assert!(store.delete("abc").await.unwrap());
    assert!(store.load("abc").await.unwrap().is_none());
}

#[tokio::test]
async fn test_existence_follows_store_and_delete() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    assert!(!store.exists("abc").await.unwrap());
    store.store("abc", &live_session("abc"), 0).await.unwrap();
    assert!(store.exists("abc").await.unwrap());
    store.delete("abc").await.unwrap();
    assert!(!store.exists("abc").await.unwrap());
}

#[tokio::test]
async fn test_exists_does_not_decode() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    backend.insert_raw(SessionRecord::new("junk", b"not a session".to_vec(), i64::MAX));
    assert!(store.exists("junk").await.unwrap());
}

#[tokio::test]
async fn test_expiry_membership() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    store.store("a", &expired_session("a"), 0).await.unwrap();
    store.store("b", &live_session("b"), 0).await.unwrap();

    let expired = store.get_expired(&ids(&["a", "b", "c"])).await;
    assert_eq!(expired, ids(&["a"]));
}

#[tokio::test]
async fn test_never_expiring_session_is_not_reported() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    let data = SessionData::new("forever", now_millis() - 60_000, 0);
    store.store("forever", &data, 0).await.unwrap();

    assert!(store.get_expired(&ids(&["forever"])).await.is_empty());
}

#[tokio::test]
async fn test_empty_candidates_skip_backing_store() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    let expired = store.get_expired(&HashSet::new()).await;
    assert!(expired.is_empty());
    assert_eq!(backend.connect_count(), 0);
    assert_eq!(backend.query_count(), 0);
}

#[tokio::test]
async fn test_recovery_after_pool_invalidated() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    store.store("abc", &live_session("abc"), 0).await.unwrap();
    assert_eq!(backend.connect_count(), 1);

    store.invalidate_pool().await;
    store.store("def", &live_session("def"), 0).await.unwrap();
    assert_eq!(backend.connect_count(), 2);

    store.invalidate_pool().await;
    assert!(store.load("abc").await.unwrap().is_some());
    assert_eq!(backend.connect_count(), 3);
    assert_eq!(store.connection_state(), ConnectionState::Active);
}

#[tokio::test]
async fn test_unconfigured_store_is_noop() {
    let backend = MemoryBackend::new();
    let store = PersistentSessionStore::new(
        backend.clone(),
        &DatabaseSettings::default(),
        StoreConfig::default().with_write_policy(WriteFailurePolicy::Strict),
    );

    assert!(!store.is_configured());
    store.store("abc", &live_session("abc"), 0).await.unwrap();
    assert!(store.load("abc").await.unwrap().is_none());
    assert!(!store.exists("abc").await.unwrap());
    assert!(store.delete("abc").await.unwrap());
    assert!(store.get_expired(&ids(&["abc"])).await.is_empty());
    store.bootstrap().await.unwrap();

    assert_eq!(backend.connect_count(), 0);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_best_effort_write_swallows_acquisition_failure() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    backend.fail_next_connects(2);
    store.store("abc", &live_session("abc"), 0).await.unwrap();
    assert!(backend.record("abc").is_none());
    assert_eq!(store.connection_state(), ConnectionState::Uninitialized);

    // The next write gets a fresh pool
    store.store("abc", &live_session("abc"), 0).await.unwrap();
    assert!(backend.record("abc").is_some());
}

#[tokio::test]
async fn test_strict_write_propagates_acquisition_failure() {
    let backend = MemoryBackend::new();
    let store = PersistentSessionStore::new(
        backend.clone(),
        &settings(),
        StoreConfig::default().with_write_policy(WriteFailurePolicy::Strict),
    );

    backend.fail_next_connects(2);
    let err = store.store("abc", &live_session("abc"), 0).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionAcquisition(_)));
}

#[tokio::test]
async fn test_reads_propagate_acquisition_failure() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    backend.fail_next_connects(2);
    assert!(matches!(
        store.load("abc").await,
        Err(Error::ConnectionAcquisition(_))
    ));

    backend.fail_next_connects(2);
    assert!(matches!(
        store.exists("abc").await,
        Err(Error::ConnectionAcquisition(_))
    ));

    backend.fail_next_connects(2);
    assert!(matches!(
        store.delete("abc").await,
        Err(Error::ConnectionAcquisition(_))
    ));

    backend.fail_next_connects(2);
    assert!(store.get_expired(&ids(&["abc"])).await.is_empty());
}

#[tokio::test]
async fn test_statement_failure_propagates() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    backend.fail_next_queries(1);
    let err = store.store("abc", &live_session("abc"), 0).await.unwrap_err();
    assert!(matches!(err, Error::Database(_)));
}

#[tokio::test]
async fn test_undecodable_payload_reads_as_absent() {
    let backend = MemoryBackend::new();
    let metrics = StoreMetrics::new().unwrap();
    let store = new_store(&backend).with_metrics(metrics.clone());

    backend.insert_raw(SessionRecord::new("junk", b"SSDB\x01{not json".to_vec(), i64::MAX));
    assert!(store.load("junk").await.unwrap().is_none());
    assert_eq!(
        metrics
            .decode_failures_total
            .with_label_values(&["memory"])
            .get(),
        1.0
    );
}

#[tokio::test]
async fn test_close_and_restart() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    store.store("abc", &live_session("abc"), 0).await.unwrap();
    store.close().await;
    store.close().await;

    assert_eq!(store.connection_state(), ConnectionState::Closed);
    assert!(matches!(store.load("abc").await, Err(Error::StoreClosed)));
    assert!(store.get_expired(&ids(&["abc"])).await.is_empty());
    // Closing is not a transient failure, so best effort does not hide it
    assert!(matches!(
        store.store("abc", &live_session("abc"), 0).await,
        Err(Error::StoreClosed)
    ));

    store.start().await;
    assert!(store.load("abc").await.unwrap().is_some());
    assert_eq!(backend.open_pools(), 1);
}

#[tokio::test]
async fn test_bootstrap_runs_through_backend() {
    let backend = MemoryBackend::new();
    let store = new_store(&backend);

    store.bootstrap().await.unwrap();
    store.bootstrap().await.unwrap();
    assert_eq!(backend.bootstrap_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_share_one_pool() {
    let backend = MemoryBackend::new();
    let store: Arc<dyn SessionDataStore> = Arc::new(new_store(&backend));

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let id = format!("session-{}", i);
                store.store(&id, &live_session(&id), 0).await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(backend.len(), 32);
    assert_eq!(backend.connect_count(), 1);
    assert_eq!(backend.checked_out(), 0);
}
