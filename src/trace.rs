//! Recorded level traces for offline replay.
//!
//! A trace is plain text, one `<elapsed_ms> <level>` pair per line. Lines
//! starting with `#` and blank lines are ignored. Replaying a trace runs
//! the exact classifier used live, so a recorded session can be re-scored
//! with different thresholds.

use anyhow::{Context, Result, bail};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::classifier::{at, BlowClassifier, BlowEvent};
use crate::config::{Config, DetectionConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    pub elapsed_ms: u64,
    pub level: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelTrace {
    points: Vec<TracePoint>,
}

impl LevelTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        self.points.last().map_or(0, |p| p.elapsed_ms)
    }

    /// Append a point; time must not run backwards
    pub fn push(&mut self, elapsed_ms: u64, level: f32) -> Result<()> {
        if let Some(last) = self.points.last() {
            if elapsed_ms < last.elapsed_ms {
                bail!(
                    "trace time went backwards: {}ms after {}ms",
                    elapsed_ms,
                    last.elapsed_ms
                );
            }
        }
        self.points.push(TracePoint { elapsed_ms, level });
        Ok(())
    }

    /// Convenience for building traces: hold `level` from `from_ms` until
    /// `to_ms` (exclusive) at `step_ms` spacing
    pub fn hold(&mut self, level: f32, from_ms: u64, to_ms: u64, step_ms: u64) -> Result<()> {
        if step_ms == 0 {
            bail!("step_ms must be greater than 0");
        }
        let mut t = from_ms;
        while t < to_ms {
            self.push(t, level)?;
            t += step_ms;
        }
        Ok(())
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut trace = LevelTrace::new();

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(elapsed), Some(level), None) = (fields.next(), fields.next(), fields.next())
            else {
                bail!("line {}: expected `<elapsed_ms> <level>`", line_no + 1);
            };

            let elapsed_ms: u64 = elapsed
                .parse()
                .with_context(|| format!("line {}: invalid elapsed time", line_no + 1))?;
            let level: f32 = level
                .parse()
                .with_context(|| format!("line {}: invalid level", line_no + 1))?;
            if !(0.0..=1.0).contains(&level) {
                bail!("line {}: level {} outside [0, 1]", line_no + 1, level);
            }

            trace
                .push(elapsed_ms, level)
                .with_context(|| format!("line {}", line_no + 1))?;
        }

        Ok(trace)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("# elapsed_ms level\n");
        for point in &self.points {
            let _ = writeln!(out, "{} {:.4}", point.elapsed_ms, point.level);
        }
        out
    }

    /// Run the trace through a fresh classifier
    pub fn replay(&self, config: &DetectionConfig) -> Vec<(u64, BlowEvent)> {
        let mut classifier = BlowClassifier::new(config.clone());
        let origin = Instant::now();
        let mut events = Vec::new();

        for point in &self.points {
            for event in classifier.process_level(point.level, at(origin, point.elapsed_ms)) {
                events.push((point.elapsed_ms, event));
            }
        }

        events
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace {}", path.display()))?;
        Self::parse(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create trace directory")?;
        }
        fs::write(path, self.to_text())
            .with_context(|| format!("Failed to write trace {}", path.display()))?;
        Ok(())
    }

    pub fn trace_path(name: &str) -> Result<PathBuf> {
        Ok(Config::config_dir()?.join("traces").join(format!("{}.trace", name)))
    }
}
