/// Blow gesture state machine
///
/// Turns the per-frame level stream into discrete blow events. A single
/// physical blow can carry several classifications at once (any, long, xl,
/// double), all emitted in the same step.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::DetectionConfig;
use crate::constants::detection::HYSTERESIS_RATIO;

/// Classification of a completed, qualifying blow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlowEvent {
    /// Previous qualifying blow ended within the double-blow gap of this one starting
    DoubleBlow,

    /// Any blow at least as long as the minimum duration
    AnyBlow,

    /// Blow reached the long-blow duration
    LongBlow,

    /// Blow reached the extra-long duration
    XlBlow,
}

impl BlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BlowEvent::DoubleBlow => "double-blow",
            BlowEvent::AnyBlow => "any-blow",
            BlowEvent::LongBlow => "long-blow",
            BlowEvent::XlBlow => "xl-blow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlowPhase {
    Silent,
    Blowing { since: Instant },
}

pub struct BlowClassifier {
    config: DetectionConfig,

    /// Rising edge: level must exceed this
    start_threshold: f32,

    /// Falling edge: level at or below this ends the blow
    end_threshold: f32,

    phase: BlowPhase,

    /// End of the last qualifying blow; discarded blows never move it
    last_blow_end: Option<Instant>,
}

impl BlowClassifier {
    pub fn new(config: DetectionConfig) -> Self {
        let start_threshold = config.blow_threshold;
        Self {
            config,
            start_threshold,
            end_threshold: start_threshold * HYSTERESIS_RATIO,
            phase: BlowPhase::Silent,
            last_blow_end: None,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn phase(&self) -> BlowPhase {
        self.phase
    }

    pub fn is_blowing(&self) -> bool {
        matches!(self.phase, BlowPhase::Blowing { .. })
    }

    pub fn blow_start_time(&self) -> Option<Instant> {
        match self.phase {
            BlowPhase::Blowing { since } => Some(since),
            BlowPhase::Silent => None,
        }
    }

    pub fn last_blow_end(&self) -> Option<Instant> {
        self.last_blow_end
    }

    /// Forget the session. An in-progress blow is dropped without events.
    pub fn reset(&mut self) {
        if let BlowPhase::Blowing { since } = self.phase {
            debug!("discarding in-progress blow started {:?} ago", since.elapsed());
        }
        self.phase = BlowPhase::Silent;
        self.last_blow_end = None;
    }

    /// Feed one level sample taken at `now` and return the events it completes
    pub fn process_level(&mut self, level: f32, now: Instant) -> Vec<BlowEvent> {
        match self.phase {
            BlowPhase::Silent => {
                if level > self.start_threshold {
                    self.phase = BlowPhase::Blowing { since: now };
                }
                Vec::new()
            }
            BlowPhase::Blowing { since } => {
                if level > self.end_threshold {
                    return Vec::new();
                }
                self.phase = BlowPhase::Silent;
                self.complete_blow(since, now)
            }
        }
    }

    fn complete_blow(&mut self, since: Instant, now: Instant) -> Vec<BlowEvent> {
        let duration = now.saturating_duration_since(since);

        if duration < self.config.any_blow_min_duration() {
            debug!("discarded blow of {}ms (noise)", duration.as_millis());
            return Vec::new();
        }

        let mut events = Vec::with_capacity(4);

        if let Some(last_end) = self.last_blow_end {
            let gap = since.saturating_duration_since(last_end);
            if gap <= self.config.double_blow_max_gap() {
                events.push(BlowEvent::DoubleBlow);
            }
        }
        self.last_blow_end = Some(now);

        events.push(BlowEvent::AnyBlow);
        if duration >= self.config.long_blow_threshold() {
            events.push(BlowEvent::LongBlow);
        }
        if duration >= self.config.xl_blow_threshold() {
            events.push(BlowEvent::XlBlow);
        }

        debug!("blow of {}ms classified as {:?}", duration.as_millis(), events);
        events
    }
}

/// Offset helper shared by replay and tests
pub fn at(origin: Instant, elapsed_ms: u64) -> Instant {
    origin + Duration::from_millis(elapsed_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> (BlowClassifier, Instant) {
        (BlowClassifier::new(DetectionConfig::default()), Instant::now())
    }

    #[test]
    fn test_rising_edge_requires_exceeding_threshold() {
        let (mut c, t0) = classifier();
        assert!(c.process_level(0.28, t0).is_empty());
        assert_eq!(c.phase(), BlowPhase::Silent);

        c.process_level(0.29, at(t0, 16));
        assert_eq!(c.blow_start_time(), Some(at(t0, 16)));
        assert!(c.is_blowing());
    }

    #[test]
    fn test_hysteresis_band_keeps_blowing() {
        let (mut c, t0) = classifier();
        c.process_level(0.5, t0);

        // 0.25 is below the rising threshold but above 0.224
        assert!(c.process_level(0.25, at(t0, 400)).is_empty());
        assert!(c.is_blowing());

        let events = c.process_level(0.22, at(t0, 500));
        assert_eq!(events, vec![BlowEvent::AnyBlow]);
        assert!(!c.is_blowing());
        assert_eq!(c.blow_start_time(), None);
    }

    #[test]
    fn test_short_blow_is_discarded() {
        let (mut c, t0) = classifier();
        c.process_level(0.5, t0);
        assert!(c.process_level(0.0, at(t0, 299)).is_empty());
        assert_eq!(c.last_blow_end(), None);
        assert_eq!(c.phase(), BlowPhase::Silent);
    }

    #[test]
    fn test_exact_minimum_duration_qualifies() {
        let (mut c, t0) = classifier();
        c.process_level(0.5, t0);
        assert_eq!(c.process_level(0.0, at(t0, 300)), vec![BlowEvent::AnyBlow]);
        assert_eq!(c.last_blow_end(), Some(at(t0, 300)));
    }

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        let (mut c, t0) = classifier();
        c.process_level(0.5, t0);
        assert_eq!(
            c.process_level(0.0, at(t0, 700)),
            vec![BlowEvent::AnyBlow, BlowEvent::LongBlow]
        );

        let (mut c, t0) = classifier();
        c.process_level(0.5, t0);
        assert_eq!(
            c.process_level(0.0, at(t0, 1200)),
            vec![BlowEvent::AnyBlow, BlowEvent::LongBlow, BlowEvent::XlBlow]
        );
    }

    #[test]
    fn test_double_blow_gap_is_end_to_start() {
        let (mut c, t0) = classifier();
        c.process_level(0.5, t0);
        c.process_level(0.0, at(t0, 400));

        // Second blow starts exactly 1200ms after the first ended
        c.process_level(0.5, at(t0, 1600));
        assert_eq!(
            c.process_level(0.0, at(t0, 2000)),
            vec![BlowEvent::DoubleBlow, BlowEvent::AnyBlow]
        );
    }

    #[test]
    fn test_gap_just_over_limit_is_single() {
        let (mut c, t0) = classifier();
        c.process_level(0.5, t0);
        c.process_level(0.0, at(t0, 400));

        c.process_level(0.5, at(t0, 1601));
        assert_eq!(c.process_level(0.0, at(t0, 2001)), vec![BlowEvent::AnyBlow]);
    }

    #[test]
    fn test_reset_drops_in_progress_blow() {
        let (mut c, t0) = classifier();
        c.process_level(0.5, t0);
        c.process_level(0.0, at(t0, 400));
        c.process_level(0.5, at(t0, 500));

        c.reset();

        assert_eq!(c.phase(), BlowPhase::Silent);
        assert_eq!(c.last_blow_end(), None);
        assert!(c.process_level(0.0, at(t0, 2000)).is_empty());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(BlowEvent::AnyBlow.name(), "any-blow");
        assert_eq!(BlowEvent::DoubleBlow.name(), "double-blow");
        assert_eq!(BlowEvent::LongBlow.name(), "long-blow");
        assert_eq!(BlowEvent::XlBlow.name(), "xl-blow");
    }
}
