//! Source precedence within one refresh cycle.

use super::harness::{session, TestHarness};
use crate::{ProviderError, RefreshError};
use coach_storage::{
    FileStorage, PersistedSession, SessionStore, StorageKeys, TokenPair, WrappedSessionRecord,
};
use tempfile::tempdir;

fn store_wrapped(h: &TestHarness, access: &str, refresh: &str) {
    let record = WrappedSessionRecord::new(PersistedSession {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_at: 1_700_000_000,
        expires_in: 3600,
        ..Default::default()
    });
    let json = serde_json::to_string(&record).unwrap();
    assert!(h.store.set(StorageKeys::WRAPPED_SESSION, &json));
}

#[tokio::test]
async fn active_provider_session_short_circuits() {
    let h = TestHarness::new();
    store_wrapped(&h, "stored-access", "stored-refresh");
    h.provider.set_current(Some(session("live-A", "live-B")));

    assert_eq!(h.reconciler.refresh().await, Ok("live-A".to_string()));

    assert!(h.provider.establish_calls().is_empty());
    assert!(h.provider.refresh_calls().is_empty());
    assert_eq!(
        h.store.get(StorageKeys::ACCESS_TOKEN).as_deref(),
        Some("live-A")
    );
}

#[tokio::test]
async fn provider_session_without_access_token_is_not_used() {
    let h = TestHarness::new();
    h.provider.set_current(Some(session("", "live-B")));
    h.store.set(StorageKeys::REFRESH_TOKEN, "legacy-refresh");
    h.provider.set_refresh_result(Ok(session("new-A", "new-B")));

    assert_eq!(h.reconciler.refresh().await, Ok("new-A".to_string()));
    assert_eq!(h.provider.refresh_calls(), vec!["legacy-refresh".to_string()]);
}

#[tokio::test]
async fn wrapped_record_is_rehydrated_without_forced_refresh() {
    let h = TestHarness::new();
    store_wrapped(&h, "stored-access", "stored-refresh");
    h.provider.set_establish_result(Ok(session("new-A", "new-B")));

    assert_eq!(h.reconciler.refresh().await, Ok("new-A".to_string()));

    assert_eq!(
        h.provider.establish_calls(),
        vec![("stored-access".to_string(), "stored-refresh".to_string())]
    );
    assert!(h.provider.refresh_calls().is_empty());

    assert_eq!(h.store.get(StorageKeys::ACCESS_TOKEN).as_deref(), Some("new-A"));
    assert_eq!(h.store.get(StorageKeys::REFRESH_TOKEN).as_deref(), Some("new-B"));
    let wrapped = h.store.read_tokens().wrapped.unwrap();
    assert_eq!(wrapped.current_session.access_token, "new-A");
    assert_eq!(wrapped.current_session.refresh_token, "new-B");
}

#[tokio::test]
async fn bare_refresh_token_goes_straight_to_forced_refresh() {
    let h = TestHarness::new();
    h.store.set(StorageKeys::REFRESH_TOKEN, "legacy-refresh");
    h.provider.set_refresh_result(Ok(session("new-A", "new-B")));

    assert_eq!(h.reconciler.refresh().await, Ok("new-A".to_string()));

    assert!(h.provider.establish_calls().is_empty());
    assert_eq!(h.provider.refresh_calls(), vec!["legacy-refresh".to_string()]);
}

#[tokio::test]
async fn rejected_pair_is_dropped_and_refreshed() {
    let h = TestHarness::new();
    store_wrapped(&h, "stored-access", "stored-refresh");
    h.provider.set_refresh_result(Ok(session("new-A", "new-B")));

    assert_eq!(h.reconciler.refresh().await, Ok("new-A".to_string()));

    assert_eq!(h.provider.establish_calls().len(), 1);
    assert_eq!(h.provider.refresh_calls(), vec!["stored-refresh".to_string()]);
}

#[tokio::test]
async fn rejected_pair_is_not_retried_by_the_next_cycle() {
    let h = TestHarness::new();
    store_wrapped(&h, "stored-access", "stored-refresh");
    h.provider
        .set_refresh_result(Err(ProviderError::Network("offline".to_string())));

    assert!(matches!(
        h.reconciler.refresh().await,
        Err(RefreshError::Transient(_))
    ));
    assert_eq!(h.store.get(StorageKeys::WRAPPED_SESSION), None);
    assert_eq!(
        h.store.read_tokens().resolve(),
        TokenPair::RefreshOnly("stored-refresh".to_string())
    );

    let _ = h.reconciler.refresh().await;
    assert_eq!(h.provider.establish_calls().len(), 1);
    assert_eq!(h.provider.refresh_calls().len(), 2);
}

#[tokio::test]
async fn nothing_to_refresh_with_is_terminal() {
    let h = TestHarness::new();

    assert_eq!(h.reconciler.refresh().await, Err(RefreshError::NoSession));
    assert!(h.provider.establish_calls().is_empty());
    assert!(h.provider.refresh_calls().is_empty());
    assert_eq!(h.navigator.navigations(), vec!["/login".to_string()]);
}

#[tokio::test]
async fn refreshed_session_survives_a_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session-store.json");

    let h = TestHarness::with_store(SessionStore::new(Box::new(FileStorage::new(&path))));
    h.store.set(StorageKeys::REFRESH_TOKEN, "legacy-refresh");
    h.provider.set_refresh_result(Ok(session("new-A", "new-B")));
    assert_eq!(h.reconciler.refresh().await, Ok("new-A".to_string()));

    let reopened = SessionStore::new(Box::new(FileStorage::new(&path)));
    assert_eq!(
        reopened.read_tokens().resolve(),
        TokenPair::Complete {
            access_token: "new-A".to_string(),
            refresh_token: "new-B".to_string(),
        }
    );
}

#[tokio::test]
async fn current_access_token_prefers_memory() {
    let h = TestHarness::new();
    h.store.set(StorageKeys::ACCESS_TOKEN, "stored");
    assert_eq!(h.reconciler.current_access_token().as_deref(), Some("stored"));

    h.reconciler.adopt_session(&session("memory", "r"));
    assert_eq!(h.reconciler.current_access_token().as_deref(), Some("memory"));

    h.reconciler.clear_session();
    assert_eq!(h.reconciler.current_access_token().as_deref(), Some("memory"));
}
