//! Microphone permission state machine.
//!
//! Tracks host-level microphone authorization independently of any
//! listening session:
//!
//! ```text
//! unknown --check/request--> prompt | granted | denied | unavailable
//! prompt  --request ok-----> granted
//! denied  --request ok-----> granted
//! *       --reset----------> unknown
//! ```
//!
//! Denials are sub-classified so the UI can tell "the user just said no"
//! from "this was blocked before we asked" from "there is no microphone".
//! The manager is shared by reference; a request that is already in
//! flight makes a second caller fail immediately instead of queueing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::constants::permission::FAST_DENIAL_WINDOW;
use crate::error::AcquireError;
use crate::platform::{AudioPlatform, InputStream, PlatformPermission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Unknown,
    Prompt,
    Granted,
    Denied,
    Unavailable,
}

impl PermissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionState::Unknown => "unknown",
            PermissionState::Prompt => "prompt",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
            PermissionState::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The user refused the prompt this time
    UserDenied,
    /// Refused without a fresh decision (cached or policy block)
    BrowserBlocked,
    NoDevice,
    BrowserUnsupported,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::UserDenied => "user_denied",
            DenialReason::BrowserBlocked => "browser_blocked",
            DenialReason::NoDevice => "no_device",
            DenialReason::BrowserUnsupported => "browser_unsupported",
        }
    }

    /// Short hint for the player
    pub fn help_text(&self) -> &'static str {
        match self {
            DenialReason::UserDenied => "Microphone access was declined. Allow it and try again.",
            DenialReason::BrowserBlocked => {
                "Microphone access is blocked. Enable it in your system privacy settings."
            }
            DenialReason::NoDevice => "No microphone found. Connect one and try again.",
            DenialReason::BrowserUnsupported => "Microphone input is not supported here.",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionRecord {
    pub state: PermissionState,
    pub denial_reason: Option<DenialReason>,
    /// A request has been made at least once since the last reset
    pub has_user_seen_prompt: bool,
}

/// What `request_microphone_access` reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOutcome {
    pub success: bool,
    pub state: PermissionState,
    pub denial_reason: Option<DenialReason>,
    pub error: Option<AcquireError>,
}

/// Map a failed request onto a state and reason.
///
/// A not-allowed failure only counts as a cached block when it came back
/// faster than a human could click and a prompt had already been shown.
pub fn classify_denial(
    error: &AcquireError,
    elapsed: Duration,
    prompt_seen_before: bool,
) -> (PermissionState, DenialReason) {
    match error {
        AcquireError::NotAllowed(_) => {
            if elapsed < FAST_DENIAL_WINDOW && prompt_seen_before {
                (PermissionState::Denied, DenialReason::BrowserBlocked)
            } else {
                (PermissionState::Denied, DenialReason::UserDenied)
            }
        }
        AcquireError::NotFound(_) => (PermissionState::Unavailable, DenialReason::NoDevice),
        _ => (PermissionState::Unavailable, DenialReason::BrowserUnsupported),
    }
}

/// Clears the in-flight flag however the request ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PermissionManager<P: AudioPlatform> {
    platform: Arc<P>,
    record: Mutex<PermissionRecord>,
    stream: Mutex<Option<P::Stream>>,
    request_in_flight: AtomicBool,
}

impl<P: AudioPlatform> PermissionManager<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self {
            platform,
            record: Mutex::new(PermissionRecord::default()),
            stream: Mutex::new(None),
            request_in_flight: AtomicBool::new(false),
        }
    }

    fn lock_record(&self) -> MutexGuard<'_, PermissionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<P::Stream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self) -> PermissionRecord {
        *self.lock_record()
    }

    pub fn permission_state(&self) -> PermissionState {
        self.lock_record().state
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        self.lock_record().denial_reason
    }

    pub fn has_user_seen_prompt(&self) -> bool {
        self.lock_record().has_user_seen_prompt
    }

    pub fn is_request_in_flight(&self) -> bool {
        self.request_in_flight.load(Ordering::Acquire)
    }

    pub fn has_stream(&self) -> bool {
        self.lock_stream().is_some()
    }

    /// Hand the granted stream to a listening session
    pub fn take_stream(&self) -> Option<P::Stream> {
        self.lock_stream().take()
    }

    /// Ask the host for the current permission without prompting.
    /// Hosts without a query API report `Unknown` and leave the record alone.
    pub fn check_existing_permission_state(&self) -> PermissionState {
        let Some(queried) = self.platform.query_permission() else {
            debug!("permission query unsupported on this host");
            return PermissionState::Unknown;
        };

        let mut record = self.lock_record();
        match queried {
            PlatformPermission::Granted => {
                record.state = PermissionState::Granted;
                record.denial_reason = None;
            }
            PlatformPermission::Prompt => {
                record.state = PermissionState::Prompt;
                record.denial_reason = None;
            }
            PlatformPermission::Denied => {
                record.state = PermissionState::Denied;
                if record.denial_reason.is_none() {
                    record.denial_reason = Some(DenialReason::BrowserBlocked);
                }
            }
        }
        debug!("queried microphone permission: {}", record.state);
        record.state
    }

    /// Prompt for microphone access (if the host prompts) and open a stream.
    pub fn request_microphone_access(&self) -> PermissionOutcome {
        if self
            .request_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let record = self.record();
            return PermissionOutcome {
                success: false,
                state: record.state,
                denial_reason: record.denial_reason,
                error: Some(AcquireError::RequestInProgress),
            };
        }
        let _in_flight = InFlightGuard(&self.request_in_flight);

        let prompt_seen_before = {
            let mut record = self.lock_record();
            let seen = record.has_user_seen_prompt;
            record.has_user_seen_prompt = true;
            seen
        };

        let started = Instant::now();
        let result = self.platform.open_stream();
        let elapsed = started.elapsed();

        match result {
            Ok(stream) => {
                if let Some(mut previous) = self.lock_stream().replace(stream) {
                    previous.stop();
                }
                let mut record = self.lock_record();
                record.state = PermissionState::Granted;
                record.denial_reason = None;
                info!("microphone access granted");

                PermissionOutcome {
                    success: true,
                    state: record.state,
                    denial_reason: None,
                    error: None,
                }
            }
            Err(error) => {
                let (state, reason) = classify_denial(&error, elapsed, prompt_seen_before);
                let mut record = self.lock_record();
                record.state = state;
                record.denial_reason = Some(reason);
                warn!(
                    "microphone access failed after {}ms: {} ({})",
                    elapsed.as_millis(),
                    error,
                    reason
                );

                PermissionOutcome {
                    success: false,
                    state,
                    denial_reason: Some(reason),
                    error: Some(error),
                }
            }
        }
    }

    /// Forget everything so the player can retry from scratch
    pub fn reset_permission_state(&self) {
        if let Some(mut stream) = self.lock_stream().take() {
            stream.stop();
        }
        *self.lock_record() = PermissionRecord::default();
        debug!("permission state reset");
    }
}

impl<P: AudioPlatform> Drop for PermissionManager<P> {
    fn drop(&mut self) {
        if let Some(mut stream) = self.lock_stream().take() {
            stream.stop();
        }
    }
}
