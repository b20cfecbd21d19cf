//! Microphone lifecycle controller
//!
//! Owns the stream and the processing graph of one listening session and
//! drives sample -> classify -> publish once per frame. Start and stop are
//! idempotent; every failure ends in the same cleanup path.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::classifier::BlowClassifier;
use crate::config::{AnalyserConfig, DetectionConfig};
use crate::error::AcquireError;
use crate::events::{DetectorEvent, EventBus, Subscription};
use crate::platform::{AudioPlatform, FrequencyAnalyser, InputStream};
use crate::sampler::AmplitudeSampler;

/// The single scheduled frame callback of a listening session
#[derive(Debug, Clone, Copy)]
struct FrameLoop {
    interval: Duration,
    next_frame_at: Option<Instant>,
}

impl FrameLoop {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_frame_at: None,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_frame_at.map_or(true, |at| now >= at)
    }

    fn schedule_after(&mut self, now: Instant) {
        self.next_frame_at = Some(now + self.interval);
    }
}

pub struct MicrophoneController<P: AudioPlatform> {
    platform: Arc<P>,
    analyser_config: AnalyserConfig,

    /// Open microphone input, exclusively owned by this controller
    stream: Option<P::Stream>,

    /// Processing graph fed by `stream`
    graph: Option<P::Analyser>,

    sampler: AmplitudeSampler,
    classifier: BlowClassifier,

    /// Present iff listening
    frame_loop: Option<FrameLoop>,

    events: EventBus,
    last_level: f32,
}

impl<P: AudioPlatform> MicrophoneController<P> {
    pub fn new(platform: Arc<P>, detection: DetectionConfig, analyser_config: AnalyserConfig) -> Self {
        Self {
            platform,
            sampler: AmplitudeSampler::new(analyser_config.frequency_bin_count()),
            analyser_config,
            stream: None,
            graph: None,
            classifier: BlowClassifier::new(detection),
            frame_loop: None,
            events: EventBus::new(),
            last_level: 0.0,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.frame_loop.is_some()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn detection_config(&self) -> &DetectionConfig {
        self.classifier.config()
    }

    pub fn classifier(&self) -> &BlowClassifier {
        &self.classifier
    }

    /// Most recent level published on the event bus
    pub fn level(&self) -> f32 {
        self.last_level
    }

    /// When the next frame should run, if listening
    pub fn next_frame_at(&self) -> Option<Instant> {
        self.frame_loop.and_then(|frame_loop| frame_loop.next_frame_at)
    }

    /// Adopt a stream opened elsewhere (e.g. by a permission request) so the
    /// device is not opened twice. Ignored while a session is running.
    pub fn attach_stream(&mut self, mut stream: P::Stream) {
        if self.is_listening() {
            warn!("already listening, releasing attached stream");
            stream.stop();
            return;
        }
        if let Some(mut old) = self.stream.replace(stream) {
            old.stop();
        }
    }

    /// Start a session. Returns true if listening afterwards; never panics
    /// or propagates acquisition errors.
    pub fn start_listening(&mut self) -> bool {
        if self.is_listening() {
            return true;
        }

        match self.acquire() {
            Ok(()) => {
                self.classifier.reset();
                self.frame_loop = Some(FrameLoop::new(self.analyser_config.frame_interval()));
                info!("listening ({} frequency bins)", self.sampler.bin_count());
                true
            }
            Err(e) => {
                warn!("failed to start listening: {}", e);
                self.release();
                false
            }
        }
    }

    fn acquire(&mut self) -> Result<(), AcquireError> {
        let stream = match self.stream.take() {
            Some(stream) if stream.is_active() => stream,
            stale => {
                if let Some(mut stale) = stale {
                    stale.stop();
                }
                debug!("requesting microphone stream");
                self.platform.open_stream()?
            }
        };
        let stream = self.stream.insert(stream);

        let graph = match self.graph.take() {
            Some(graph) if !graph.is_closed() => graph,
            _ => self.platform.create_analyser(stream, &self.analyser_config)?,
        };
        let graph = self.graph.insert(graph);

        if graph.is_suspended() {
            debug!("resuming suspended processing graph");
            graph.resume()?;
        }

        self.sampler.resize(graph.frequency_bin_count());
        Ok(())
    }

    /// Stop the session and release the hardware. Always safe to call.
    pub fn stop_listening(&mut self) {
        let was_listening = self.frame_loop.take().is_some();

        self.release();
        self.classifier.reset();
        self.last_level = 0.0;
        self.events.publish(DetectorEvent::Level(0.0));

        if was_listening {
            info!("stopped listening");
        }
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        if let Some(mut graph) = self.graph.take() {
            if !graph.is_closed() {
                graph.close();
            }
        }
    }

    /// Frame callback. Runs one sample/classify step if listening and the
    /// frame is due; returns whether a frame ran.
    pub fn poll_frame(&mut self, now: Instant) -> bool {
        let Some(frame_loop) = self.frame_loop.as_mut() else {
            return false;
        };
        if !frame_loop.is_due(now) {
            return false;
        }
        frame_loop.schedule_after(now);

        self.run_frame(now);
        true
    }

    fn run_frame(&mut self, now: Instant) {
        let Some(graph) = self.graph.as_mut() else {
            warn!("frame ran without a processing graph, stopping");
            self.stop_listening();
            return;
        };

        match self.sampler.sample(graph) {
            Ok(level) => {
                self.last_level = level;
                self.events.publish(DetectorEvent::Level(level));
                for event in self.classifier.process_level(level, now) {
                    self.events.publish(DetectorEvent::Blow(event));
                }
            }
            Err(e) => {
                warn!("analysis failed, ending session: {}", e);
                self.stop_listening();
            }
        }
    }
}

impl<P: AudioPlatform> Drop for MicrophoneController<P> {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
