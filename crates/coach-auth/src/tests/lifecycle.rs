//! Startup, provider events, logout, and token hand-out.

use super::harness::{
    backend_user, jwt_expiring_in, provider_user, session, test_timings, wait_until, TestHarness,
};
use crate::{
    AuthError, AuthPhase, LogoutOptions, RefreshError, RegisterRequest, Session, SessionEvent,
    SessionEventKind,
};
use coach_config_and_utils::AuthTimings;
use coach_storage::StorageKeys;
use std::time::Duration;

fn signed_in(session: Session) -> SessionEvent {
    SessionEvent::new(SessionEventKind::SignedIn, Some(session))
}

fn assert_storage_empty(h: &TestHarness) {
    for key in StorageKeys::SESSION_KEYS {
        assert_eq!(h.store.get(key), None, "{key} should be empty");
    }
}

/// Sign in through the backend login endpoint.
async fn log_in(h: &TestHarness) {
    let body = TestHarness::login_body("u-1", "coach", &session("login-A", "login-B"));
    h.transport.respond("/auth/login", 200, body);
    h.controller
        .login("casey@example.com", "hunter2")
        .await
        .unwrap();
}

#[tokio::test]
async fn startup_uses_stored_access_token() {
    let h = TestHarness::new();
    h.store.set(StorageKeys::ACCESS_TOKEN, "stored-A");
    h.transport.respond("/auth/me", 200, backend_user("u-1", "coach"));

    let phase = h.controller.initialize().await;

    let user = phase.user().unwrap();
    assert_eq!(user.id, "u-1");
    assert_eq!(user.role.as_deref(), Some("coach"));
    assert_eq!(
        h.transport.requests_to("/auth/me")[0].bearer.as_deref(),
        Some("stored-A")
    );
    assert_eq!(h.provider.current_calls(), 0);
}

#[tokio::test]
async fn startup_falls_back_to_provider_session() {
    let h = TestHarness::new();
    h.provider.set_current(Some(session("live-A", "live-B")));
    h.transport.respond("/auth/me", 200, backend_user("u-1", "coach"));

    assert!(h.controller.initialize().await.is_authenticated());

    assert_eq!(
        h.store.get(StorageKeys::ACCESS_TOKEN).as_deref(),
        Some("live-A")
    );
    assert_eq!(
        h.store.get(StorageKeys::REFRESH_TOKEN).as_deref(),
        Some("live-B")
    );
    assert_eq!(
        h.reconciler.current_session().unwrap().access_token,
        "live-A"
    );
}

#[tokio::test]
async fn rejected_stored_token_falls_back_to_provider_session() {
    let h = TestHarness::new();
    h.store.set(StorageKeys::ACCESS_TOKEN, "stale-A");
    h.provider.set_current(Some(session("live-A", "live-B")));
    h.transport.respond("/auth/me", 401, "");
    h.transport.respond("/auth/me", 200, backend_user("u-1", "coach"));

    assert!(h.controller.initialize().await.is_authenticated());
    let sent = h.transport.requests_to("/auth/me");
    assert_eq!(sent[1].bearer.as_deref(), Some("live-A"));
}

#[tokio::test]
async fn failed_startup_clears_storage() {
    let h = TestHarness::new();
    h.store.set(StorageKeys::ACCESS_TOKEN, "stale-A");
    h.store.set(StorageKeys::REFRESH_TOKEN, "stale-B");

    assert_eq!(h.controller.initialize().await, AuthPhase::Unauthenticated);

    assert_storage_empty(&h);
    assert!(h.controller.user().is_none());
    assert!(h.navigator.navigations().is_empty());
}

#[tokio::test]
async fn slow_provider_lookup_counts_as_no_session() {
    let h = TestHarness::new();
    h.provider.set_current(Some(session("live-A", "live-B")));
    h.provider.set_current_delay(Duration::from_millis(400));

    assert_eq!(h.controller.initialize().await, AuthPhase::Unauthenticated);
    assert!(h.transport.requests_to("/auth/me").is_empty());
}

#[tokio::test]
async fn safety_timer_ends_loading_and_late_startup_still_applies() {
    let h = TestHarness::with_timings(AuthTimings {
        whoami_timeout_ms: 2000,
        startup_safety_ms: 300,
        ..test_timings()
    });
    h.store.set(StorageKeys::ACCESS_TOKEN, "stored-A");
    h.transport.delay("/auth/me", Duration::from_millis(600));
    h.transport.respond("/auth/me", 200, backend_user("u-1", "coach"));

    let mut phases = h.controller.subscribe_phase();
    assert_eq!(h.controller.initialize().await, AuthPhase::Unauthenticated);

    wait_until(|| h.controller.phase().is_authenticated()).await;
    assert_eq!(h.controller.user().unwrap().id, "u-1");
    assert!(phases.has_changed().unwrap());
    assert!(phases.borrow_and_update().is_authenticated());
}

#[tokio::test]
async fn late_startup_failure_does_not_undo_a_login() {
    let h = TestHarness::with_timings(AuthTimings {
        whoami_timeout_ms: 2000,
        startup_safety_ms: 200,
        ..test_timings()
    });
    h.store.set(StorageKeys::ACCESS_TOKEN, "stale-A");
    h.transport.delay("/auth/me", Duration::from_millis(400));
    h.transport.respond("/auth/me", 401, "");

    assert_eq!(h.controller.initialize().await, AuthPhase::Unauthenticated);
    log_in(&h).await;

    wait_until(|| h.transport.requests_to("/auth/me").len() == 1).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(h.controller.phase().is_authenticated());
    assert_eq!(
        h.store.get(StorageKeys::ACCESS_TOKEN).as_deref(),
        Some("login-A")
    );
}

#[tokio::test]
async fn signed_in_event_authenticates() {
    let h = TestHarness::new();
    h.transport.respond("/auth/me", 200, backend_user("u-1", "coach"));
    let _guard = h.controller.start();

    h.provider
        .emit(SessionEventKind::SignedIn, Some(session("ev-A", "ev-B")));

    wait_until(|| h.controller.phase().is_authenticated()).await;
    assert_eq!(
        h.store.get(StorageKeys::ACCESS_TOKEN).as_deref(),
        Some("ev-A")
    );
}

#[tokio::test]
async fn signed_out_event_is_ignored() {
    let h = TestHarness::new();
    h.transport.respond("/auth/me", 200, backend_user("u-1", "coach"));
    h.controller.handle_event(signed_in(session("ev-A", "ev-B"))).await;
    assert!(h.controller.phase().is_authenticated());

    h.controller
        .handle_event(SessionEvent::new(SessionEventKind::SignedOut, None))
        .await;

    assert!(h.controller.phase().is_authenticated());
    assert!(h.navigator.navigations().is_empty());
    assert!(h.store.get(StorageKeys::ACCESS_TOKEN).is_some());
}

#[tokio::test]
async fn event_burst_is_processed_once() {
    let h = TestHarness::new();
    h.transport.respond_always("/auth/me", 200, backend_user("u-1", "coach"));

    tokio::join!(
        h.controller.handle_event(signed_in(session("a1", "r1"))),
        h.controller.handle_event(signed_in(session("a2", "r2"))),
        h.controller.handle_event(signed_in(session("a3", "r3"))),
    );
    h.controller.handle_event(signed_in(session("a4", "r4"))).await;
    assert_eq!(h.transport.requests_to("/auth/me").len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    h.controller.handle_event(signed_in(session("a5", "r5"))).await;
    assert_eq!(h.transport.requests_to("/auth/me").len(), 2);
}

#[tokio::test]
async fn provider_claims_cover_a_failing_backend() {
    let h = TestHarness::new();
    h.transport.respond("/auth/me", 500, "boom");

    h.controller.handle_event(signed_in(session("ev-A", "ev-B"))).await;

    let user = h.controller.user().unwrap();
    assert_eq!(user.id, "u-1");
    assert_eq!(user.role.as_deref(), Some("coach"));
    assert_eq!(user.name.as_deref(), Some("Casey Coach"));
}

#[tokio::test]
async fn backend_401_is_not_papered_over_with_claims() {
    let h = TestHarness::new();
    h.transport.respond("/auth/me", 401, "");

    h.controller.handle_event(signed_in(session("ev-A", "ev-B"))).await;

    assert_eq!(h.controller.phase(), AuthPhase::Loading);
    assert!(h.controller.user().is_none());
    assert_storage_empty(&h);
    assert!(h.reconciler.current_session().is_none());
}

#[tokio::test]
async fn backend_role_wins_over_provider_claims() {
    let h = TestHarness::new();
    h.transport.respond("/auth/me", 200, backend_user("u-1", "admin"));

    let mut event_session = session("ev-A", "ev-B");
    event_session.user = provider_user("u-1", "coach");
    h.controller.handle_event(signed_in(event_session)).await;

    assert_eq!(h.controller.user().unwrap().role.as_deref(), Some("admin"));
}

#[tokio::test]
async fn concurrent_logouts_run_once() {
    let h = TestHarness::new();
    log_in(&h).await;

    tokio::join!(
        h.controller.logout(LogoutOptions::default()),
        h.controller.logout(LogoutOptions::default()),
    );

    assert_eq!(h.provider.sign_out_calls(), 1);
    assert_eq!(h.navigator.navigations(), vec!["/login".to_string()]);
    assert_eq!(h.controller.phase(), AuthPhase::Unauthenticated);
    assert_storage_empty(&h);
    assert!(h.reconciler.current_session().is_none());
}

#[tokio::test]
async fn logout_on_login_route_does_not_navigate() {
    let h = TestHarness::new();
    h.navigator.set_route("/login");

    h.controller
        .logout(LogoutOptions {
            skip_provider_sign_out: true,
        })
        .await;

    assert!(h.navigator.navigations().is_empty());
    assert_eq!(h.provider.sign_out_calls(), 0);
    assert_eq!(h.controller.phase(), AuthPhase::Unauthenticated);
}

#[tokio::test]
async fn logout_rejects_refresh_waiters_and_discards_late_result() {
    let h = TestHarness::new();
    h.store.set(StorageKeys::REFRESH_TOKEN, "r0");
    h.provider.set_refresh_result(Ok(session("new-A", "new-B")));
    h.provider.hold_refreshes();

    let caller = {
        let reconciler = h.reconciler.clone();
        tokio::spawn(async move { reconciler.refresh().await })
    };
    wait_until(|| h.provider.refresh_calls().len() == 1).await;

    h.controller.logout(LogoutOptions::default()).await;
    assert_eq!(caller.await.unwrap(), Err(RefreshError::LoggedOut));

    h.provider.release_refreshes();
    wait_until(|| !h.reconciler.is_refreshing()).await;
    assert_storage_empty(&h);
    assert!(h.reconciler.current_session().is_none());
    assert!(h.provider.held_session().is_none());
}

#[tokio::test]
async fn refresh_finishing_after_logout_cannot_revive_the_session() {
    let h = TestHarness::new();
    h.transport.respond_always("/auth/me", 200, backend_user("u-1", "coach"));
    log_in(&h).await;
    let _guard = h.controller.start();
    h.provider.set_refresh_result(Ok(session("new-A", "new-B")));
    h.provider.hold_refreshes();

    let caller = {
        let reconciler = h.reconciler.clone();
        tokio::spawn(async move { reconciler.refresh().await })
    };
    wait_until(|| h.provider.refresh_calls().len() == 1).await;
    h.controller.logout(LogoutOptions::default()).await;
    assert_eq!(caller.await.unwrap(), Err(RefreshError::LoggedOut));

    // On release the provider holds new-A and emits TokenRefreshed for it.
    h.provider.release_refreshes();
    wait_until(|| !h.reconciler.is_refreshing()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.controller.phase(), AuthPhase::Unauthenticated);
    assert_storage_empty(&h);
    assert!(h.reconciler.current_session().is_none());
    assert!(h.provider.held_session().is_none());
    assert!(h.transport.requests_to("/auth/me").is_empty());
}

#[tokio::test]
async fn session_events_after_logout_are_ignored() {
    let h = TestHarness::new();
    log_in(&h).await;
    h.controller.logout(LogoutOptions::default()).await;
    h.transport.respond_always("/auth/me", 200, backend_user("u-1", "coach"));

    h.controller.handle_event(signed_in(session("ev-A", "ev-B"))).await;
    h.controller
        .handle_event(SessionEvent::new(
            SessionEventKind::TokenRefreshed,
            Some(session("ev-A", "ev-B")),
        ))
        .await;

    assert_eq!(h.controller.phase(), AuthPhase::Unauthenticated);
    assert!(h.transport.requests_to("/auth/me").is_empty());
    assert_storage_empty(&h);
}

#[tokio::test]
async fn logout_while_event_user_resolves_wins() {
    let h = TestHarness::new();
    h.transport.delay("/auth/me", Duration::from_millis(100));
    h.transport.respond("/auth/me", 200, backend_user("u-1", "coach"));

    let event = {
        let controller = h.controller.clone();
        tokio::spawn(async move {
            controller
                .handle_event(signed_in(session("ev-A", "ev-B")))
                .await
        })
    };
    wait_until(|| h.transport.requests_to("/auth/me").len() == 1).await;
    h.controller.logout(LogoutOptions::default()).await;
    event.await.unwrap();

    assert_eq!(h.controller.phase(), AuthPhase::Unauthenticated);
    assert_storage_empty(&h);
    assert!(h.reconciler.current_session().is_none());
}

#[tokio::test]
async fn provider_refresh_event_reaches_the_controller() {
    let h = TestHarness::new();
    h.transport.respond_always("/auth/me", 200, backend_user("u-1", "coach"));
    let _guard = h.controller.start();
    h.store.set(StorageKeys::REFRESH_TOKEN, "r0");
    h.provider.set_refresh_result(Ok(session("new-A", "new-B")));

    assert_eq!(h.reconciler.refresh().await, Ok("new-A".to_string()));

    wait_until(|| h.controller.phase().is_authenticated()).await;
    assert_eq!(
        h.transport.requests_to("/auth/me")[0].bearer.as_deref(),
        Some("new-A")
    );
}

#[tokio::test]
async fn login_rearms_logout() {
    let h = TestHarness::new();
    log_in(&h).await;
    h.controller.logout(LogoutOptions::default()).await;

    h.navigator.set_route("/dashboard");
    log_in(&h).await;
    assert!(h.controller.phase().is_authenticated());
    h.controller.logout(LogoutOptions::default()).await;

    assert_eq!(h.provider.sign_out_calls(), 2);
    assert_eq!(h.navigator.navigations().len(), 2);
}

#[tokio::test]
async fn login_with_bad_credentials() {
    let h = TestHarness::new();
    h.transport.respond("/auth/login", 401, "");

    let err = h
        .controller
        .login("casey@example.com", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(h.controller.phase(), AuthPhase::Loading);
    assert_eq!(h.store.get(StorageKeys::ACCESS_TOKEN), None);
}

#[tokio::test]
async fn login_persists_the_returned_session() {
    let h = TestHarness::new();
    log_in(&h).await;

    let sent = h.transport.requests_to("/auth/login");
    assert_eq!(sent[0].body.as_ref().unwrap()["email"], "casey@example.com");
    assert_eq!(
        h.store.get(StorageKeys::ACCESS_TOKEN).as_deref(),
        Some("login-A")
    );
    assert_eq!(
        h.provider.establish_calls(),
        vec![("login-A".to_string(), "login-B".to_string())]
    );
    assert_eq!(h.controller.user().unwrap().id, "u-1");
}

#[tokio::test]
async fn register_signs_in() {
    let h = TestHarness::new();
    let body = TestHarness::login_body("u-9", "client", &session("reg-A", "reg-B"));
    h.transport.respond("/auth/register", 200, body);

    let user = h
        .controller
        .register(&RegisterRequest {
            email: "jo@example.com".to_string(),
            password: "s3cret".to_string(),
            name: "Jo".to_string(),
            role: Some("client".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(user.id, "u-9");
    assert!(h.controller.phase().is_authenticated());
    let sent = h.transport.requests_to("/auth/register");
    assert_eq!(sent[0].body.as_ref().unwrap()["role"], "client");
    assert_eq!(
        h.store.get(StorageKeys::REFRESH_TOKEN).as_deref(),
        Some("reg-B")
    );
}

#[tokio::test]
async fn fresh_token_is_handed_out_unchanged() {
    let h = TestHarness::new();
    let token = jwt_expiring_in(3600);
    h.reconciler.adopt_session(&session(&token, "r"));

    assert_eq!(h.controller.current_token().await, Some(token));
    assert_eq!(h.provider.current_calls(), 0);
    assert!(h.provider.refresh_calls().is_empty());
}

#[tokio::test]
async fn expiring_token_is_refreshed_before_use() {
    let h = TestHarness::new();
    h.reconciler
        .adopt_session(&session(&jwt_expiring_in(10), "r"));
    h.provider.set_current(Some(session("live-A", "live-B")));

    assert_eq!(
        h.controller.current_token().await.as_deref(),
        Some("live-A")
    );
    assert_eq!(h.provider.current_calls(), 1);
}

#[tokio::test]
async fn unreadable_token_is_refreshed_before_use() {
    let h = TestHarness::new();
    h.reconciler.adopt_session(&session("not-a-jwt", "r"));
    h.provider.set_current(Some(session("live-A", "live-B")));

    assert_eq!(
        h.controller.current_token().await.as_deref(),
        Some("live-A")
    );
    assert_eq!(h.provider.current_calls(), 1);
}

#[tokio::test]
async fn failed_pre_use_refresh_hands_out_nothing() {
    let h = TestHarness::new();
    h.reconciler
        .adopt_session(&session(&jwt_expiring_in(10), "r"));

    assert_eq!(h.controller.current_token().await, None);
    assert!(h.navigator.navigations().is_empty());
}

#[tokio::test]
async fn no_token_means_no_refresh() {
    let h = TestHarness::new();

    assert_eq!(h.controller.current_token().await, None);
    assert_eq!(h.provider.current_calls(), 0);
}

#[tokio::test]
async fn controller_client_refreshes_expiring_token_up_front() {
    let h = TestHarness::new();
    h.reconciler
        .adopt_session(&session(&jwt_expiring_in(5), "r"));
    h.provider.set_current(Some(session("live-A", "live-B")));
    h.transport.respond("/students", 200, "[]");

    h.controller_client()
        .send(crate::ApiRequest::get("/students"))
        .await
        .unwrap();

    assert_eq!(
        h.transport.requests_to("/students")[0].bearer.as_deref(),
        Some("live-A")
    );
}

#[tokio::test]
async fn proactive_refresh_swallows_failures() {
    let h = TestHarness::new();
    log_in(&h).await;

    h.controller.proactive_refresh().await;

    assert_eq!(h.provider.refresh_calls().len(), 1);
    assert!(h.controller.phase().is_authenticated());
    assert!(h.navigator.navigations().is_empty());
}

#[tokio::test]
async fn proactive_refresh_waits_for_authentication() {
    let h = TestHarness::new();

    h.controller.proactive_refresh().await;

    assert_eq!(h.provider.current_calls(), 0);
    assert!(!h.reconciler.is_refreshing());
}

#[tokio::test]
async fn dropping_the_guard_releases_the_subscription() {
    let h = TestHarness::new();
    let guard = h.controller.start();
    assert_eq!(h.provider.listener_count(), 1);

    drop(guard);

    wait_until(|| h.provider.listener_count() == 0).await;
}
