mod common;

use cloud_blower::error::AcquireError;
use cloud_blower::permission::{DenialReason, PermissionManager, PermissionRecord, PermissionState};
use cloud_blower::platform::{InputStream, PlatformPermission};
use common::FakePlatform;
use std::sync::Arc;
use std::time::Duration;

fn manager(platform: FakePlatform) -> (PermissionManager<FakePlatform>, Arc<FakePlatform>) {
    let platform = Arc::new(platform);
    (PermissionManager::new(Arc::clone(&platform)), platform)
}

fn denied() -> AcquireError {
    AcquireError::NotAllowed("permission denied".to_string())
}

#[test]
fn test_starts_unknown() {
    let (manager, _) = manager(FakePlatform::new());
    assert_eq!(manager.record(), PermissionRecord::default());
    assert_eq!(manager.permission_state(), PermissionState::Unknown);
    assert!(!manager.has_user_seen_prompt());
    assert!(!manager.is_request_in_flight());
}

#[test]
fn test_check_without_query_support() {
    let (manager, _) = manager(FakePlatform::new());
    assert!(manager.request_microphone_access().success);

    assert_eq!(manager.check_existing_permission_state(), PermissionState::Unknown);
    // the record from the request is left alone
    assert_eq!(manager.permission_state(), PermissionState::Granted);
}

#[test]
fn test_check_reflects_host_answer() {
    let (manager, platform) = manager(FakePlatform::new().with_permission(Some(PlatformPermission::Prompt)));
    assert_eq!(manager.check_existing_permission_state(), PermissionState::Prompt);
    assert_eq!(manager.denial_reason(), None);

    platform.set_permission(Some(PlatformPermission::Granted));
    assert_eq!(manager.check_existing_permission_state(), PermissionState::Granted);
    assert_eq!(manager.denial_reason(), None);
}

#[test]
fn test_check_denied_is_blocked() {
    let (manager, _) = manager(FakePlatform::new().with_permission(Some(PlatformPermission::Denied)));
    assert_eq!(manager.check_existing_permission_state(), PermissionState::Denied);
    assert_eq!(manager.denial_reason(), Some(DenialReason::BrowserBlocked));
    // querying never counts as prompting
    assert!(!manager.has_user_seen_prompt());
}

#[test]
fn test_check_does_not_open_the_device() {
    let (manager, platform) = manager(FakePlatform::new().with_permission(Some(PlatformPermission::Granted)));
    manager.check_existing_permission_state();
    assert_eq!(platform.counters.opens(), 0);
    assert!(!manager.has_stream());
}

#[test]
fn test_successful_request_grants_and_holds_stream() {
    let (manager, platform) = manager(FakePlatform::new());
    let outcome = manager.request_microphone_access();

    assert!(outcome.success);
    assert_eq!(outcome.state, PermissionState::Granted);
    assert_eq!(outcome.denial_reason, None);
    assert_eq!(outcome.error, None);
    assert!(manager.has_user_seen_prompt());
    assert!(manager.has_stream());
    assert_eq!(platform.counters.opens(), 1);

    let stream = manager.take_stream().unwrap();
    assert!(stream.is_active());
    assert!(!manager.has_stream());
}

#[test]
fn test_first_denial_is_the_users_choice() {
    let (manager, platform) = manager(FakePlatform::new());
    platform.fail_next_open(denied());

    let outcome = manager.request_microphone_access();
    assert!(!outcome.success);
    assert_eq!(outcome.state, PermissionState::Denied);
    assert_eq!(outcome.denial_reason, Some(DenialReason::UserDenied));
    assert_eq!(outcome.error, Some(denied()));
    assert!(manager.has_user_seen_prompt());
}

#[test]
fn test_instant_repeat_denial_is_blocked() {
    let (manager, platform) = manager(FakePlatform::new());
    platform.fail_next_open(denied());
    platform.fail_next_open(denied());

    manager.request_microphone_access();
    let outcome = manager.request_microphone_access();
    assert_eq!(outcome.state, PermissionState::Denied);
    assert_eq!(outcome.denial_reason, Some(DenialReason::BrowserBlocked));
}

#[test]
fn test_slow_repeat_denial_is_the_users_choice() {
    let (manager, platform) = manager(FakePlatform::new());
    platform.fail_next_open(denied());
    platform.fail_next_open(denied());

    manager.request_microphone_access();
    platform.set_open_delay(Duration::from_millis(150));
    let outcome = manager.request_microphone_access();
    assert_eq!(outcome.denial_reason, Some(DenialReason::UserDenied));
}

#[test]
fn test_missing_device() {
    let (manager, platform) = manager(FakePlatform::new());
    platform.fail_next_open(AcquireError::NotFound("no input device".to_string()));

    let outcome = manager.request_microphone_access();
    assert_eq!(outcome.state, PermissionState::Unavailable);
    assert_eq!(outcome.denial_reason, Some(DenialReason::NoDevice));
}

#[test]
fn test_other_failures_are_unsupported() {
    let (manager, platform) = manager(FakePlatform::new());
    platform.fail_next_open(AcquireError::Busy("device in use".to_string()));

    let outcome = manager.request_microphone_access();
    assert_eq!(outcome.state, PermissionState::Unavailable);
    assert_eq!(outcome.denial_reason, Some(DenialReason::BrowserUnsupported));
}

#[test]
fn test_grant_after_denial_clears_reason() {
    let (manager, platform) = manager(FakePlatform::new());
    platform.fail_next_open(denied());

    manager.request_microphone_access();
    assert_eq!(manager.permission_state(), PermissionState::Denied);

    let outcome = manager.request_microphone_access();
    assert!(outcome.success);
    assert_eq!(manager.permission_state(), PermissionState::Granted);
    assert_eq!(manager.denial_reason(), None);
}

#[test]
fn test_second_grant_replaces_held_stream() {
    let (manager, platform) = manager(FakePlatform::new());
    manager.request_microphone_access();
    manager.request_microphone_access();

    assert_eq!(platform.counters.opens(), 2);
    assert_eq!(platform.counters.stops(), 1);
    assert!(manager.has_stream());
}

#[test]
fn test_reset_forgets_everything() {
    let (manager, platform) = manager(FakePlatform::new());
    manager.request_microphone_access();

    manager.reset_permission_state();
    assert_eq!(manager.record(), PermissionRecord::default());
    assert!(!manager.has_stream());
    assert_eq!(platform.counters.stops(), 1);

    // a denial right after reset counts as a first decision again
    platform.fail_next_open(denied());
    let outcome = manager.request_microphone_access();
    assert_eq!(outcome.denial_reason, Some(DenialReason::UserDenied));
}

#[test]
fn test_concurrent_request_is_rejected() {
    let (manager, platform) = manager(FakePlatform::new());
    let (entered, release) = platform.block_next_open();

    std::thread::scope(|s| {
        let first = s.spawn(|| manager.request_microphone_access());

        entered.recv().unwrap();
        assert!(manager.is_request_in_flight());

        let second = manager.request_microphone_access();
        assert!(!second.success);
        assert_eq!(second.error, Some(AcquireError::RequestInProgress));
        assert_eq!(second.state, PermissionState::Unknown);

        release.send(()).unwrap();
        let first = first.join().unwrap();
        assert!(first.success);
    });

    assert!(!manager.is_request_in_flight());
    assert_eq!(platform.counters.opens(), 1);
}

#[test]
fn test_drop_stops_held_stream() {
    let platform = Arc::new(FakePlatform::new());
    {
        let manager = PermissionManager::new(Arc::clone(&platform));
        manager.request_microphone_access();
    }
    assert_eq!(platform.counters.stops(), 1);
}
