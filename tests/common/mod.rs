// Scripted audio platform shared by the integration tests
#![allow(dead_code)]

use cloud_blower::config::AnalyserConfig;
use cloud_blower::error::{AcquireError, AnalysisError};
use cloud_blower::platform::{AudioPlatform, FrequencyAnalyser, InputStream, PlatformPermission};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the "microphone" currently hears, read by every analyser
#[derive(Default)]
pub struct FakeSource {
    level: Mutex<f32>,
    fail_reads: AtomicBool,
}

impl FakeSource {
    pub fn set_level(&self, level: f32) {
        *self.level.lock().unwrap() = level;
    }

    pub fn level(&self) -> f32 {
        *self.level.lock().unwrap()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub stops: AtomicUsize,
    pub analysers: AtomicUsize,
    pub resumes: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn analysers(&self) -> usize {
        self.analysers.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct Blocker {
    entered: Sender<()>,
    release: Receiver<()>,
}

#[derive(Default)]
struct Script {
    permission: Option<PlatformPermission>,
    open_errors: VecDeque<AcquireError>,
    open_delay: Duration,
    analyser_error: Option<AcquireError>,
    resume_error: Option<AcquireError>,
    start_running: bool,
    blocker: Option<Blocker>,
}

pub struct FakePlatform {
    pub source: Arc<FakeSource>,
    pub counters: Arc<Counters>,
    script: Mutex<Script>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            source: Arc::new(FakeSource::default()),
            counters: Arc::new(Counters::default()),
            script: Mutex::new(Script::default()),
        }
    }

    pub fn with_permission(self, permission: Option<PlatformPermission>) -> Self {
        self.script.lock().unwrap().permission = permission;
        self
    }

    pub fn set_permission(&self, permission: Option<PlatformPermission>) {
        self.script.lock().unwrap().permission = permission;
    }

    /// The next `open_stream` fails with `error`
    pub fn fail_next_open(&self, error: AcquireError) {
        self.script.lock().unwrap().open_errors.push_back(error);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.script.lock().unwrap().open_delay = delay;
    }

    pub fn fail_analyser(&self, error: Option<AcquireError>) {
        self.script.lock().unwrap().analyser_error = error;
    }

    pub fn fail_resume(&self, error: Option<AcquireError>) {
        self.script.lock().unwrap().resume_error = error;
    }

    /// Analysers start running instead of suspended
    pub fn start_running(&self) {
        self.script.lock().unwrap().start_running = true;
    }

    /// Park the next `open_stream` call until the returned sender fires.
    /// The receiver fires once the call has been entered.
    pub fn block_next_open(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        self.script.lock().unwrap().blocker = Some(Blocker {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }
}

pub struct FakeStream {
    active: bool,
    counters: Arc<Counters>,
}

impl InputStream for FakeStream {
    fn stop(&mut self) {
        if self.active {
            self.active = false;
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

pub struct FakeAnalyser {
    source: Arc<FakeSource>,
    counters: Arc<Counters>,
    bins: usize,
    suspended: bool,
    closed: bool,
    resume_error: Option<AcquireError>,
}

impl FrequencyAnalyser for FakeAnalyser {
    fn frequency_bin_count(&self) -> usize {
        self.bins
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> Result<(), AcquireError> {
        if let Some(error) = self.resume_error.clone() {
            return Err(error);
        }
        self.counters.resumes.fetch_add(1, Ordering::SeqCst);
        self.suspended = false;
        Ok(())
    }

    fn get_byte_frequency_data(&mut self, out: &mut [u8]) -> Result<(), AnalysisError> {
        if self.closed {
            return Err(AnalysisError::GraphClosed);
        }
        if self.source.fail_reads.load(Ordering::SeqCst) {
            return Err(AnalysisError::TapUnavailable("scripted failure".to_string()));
        }
        let byte = if self.suspended {
            0
        } else {
            (self.source.level() * 255.0).round() as u8
        };
        out.fill(byte);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AudioPlatform for FakePlatform {
    type Stream = FakeStream;
    type Analyser = FakeAnalyser;

    fn query_permission(&self) -> Option<PlatformPermission> {
        self.script.lock().unwrap().permission
    }

    fn open_stream(&self) -> Result<FakeStream, AcquireError> {
        let (blocker, delay, error) = {
            let mut script = self.script.lock().unwrap();
            (script.blocker.take(), script.open_delay, script.open_errors.pop_front())
        };

        if let Some(blocker) = blocker {
            let _ = blocker.entered.send(());
            let _ = blocker.release.recv();
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if let Some(error) = error {
            return Err(error);
        }

        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(FakeStream {
            active: true,
            counters: Arc::clone(&self.counters),
        })
    }

    fn create_analyser(
        &self,
        stream: &FakeStream,
        config: &AnalyserConfig,
    ) -> Result<FakeAnalyser, AcquireError> {
        assert!(stream.is_active(), "analyser built on a stopped stream");
        let script = self.script.lock().unwrap();
        if let Some(error) = script.analyser_error.clone() {
            return Err(error);
        }

        self.counters.analysers.fetch_add(1, Ordering::SeqCst);
        Ok(FakeAnalyser {
            source: Arc::clone(&self.source),
            counters: Arc::clone(&self.counters),
            bins: config.frequency_bin_count(),
            suspended: !script.start_running,
            closed: false,
            resume_error: script.resume_error.clone(),
        })
    }
}
