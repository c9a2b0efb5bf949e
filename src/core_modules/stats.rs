// THEORY:
// The stats sink receives timing markers from the compositor: one start/end pair
// around the read of every channel plane, and one around the parallel rendering
// phase. The compositor does not care what happens to them; a caller that wants
// numbers plugs in `TimingStats`, a caller that doesn't uses `NoStats`.

use log::debug;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Receives timing markers from the compositor.
pub trait RenderingStats: Send + Sync {
    fn start_io(&self, channel: usize);
    fn end_io(&self, channel: usize);
    fn start_rendering(&self);
    fn end_rendering(&self);
}

/// Discards every marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStats;

impl RenderingStats for NoStats {
    fn start_io(&self, _channel: usize) {}
    fn end_io(&self, _channel: usize) {}
    fn start_rendering(&self) {}
    fn end_rendering(&self) {}
}

#[derive(Debug, Default)]
struct Timings {
    io_started: BTreeMap<usize, Instant>,
    io: BTreeMap<usize, Duration>,
    rendering_started: Option<Instant>,
    rendering: Option<Duration>,
    renders: usize,
}

/// Records how long each phase took.
#[derive(Debug, Default)]
pub struct TimingStats {
    timings: Mutex<Timings>,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated read time of one channel.
    pub fn io_time(&self, channel: usize) -> Option<Duration> {
        self.lock().io.get(&channel).copied()
    }

    /// Duration of the last completed rendering phase.
    pub fn rendering_time(&self) -> Option<Duration> {
        self.lock().rendering
    }

    /// Number of completed rendering phases.
    pub fn renders(&self) -> usize {
        self.lock().renders
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Timings> {
        // A poisoned lock only means a marker call panicked; the data is still usable.
        self.timings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RenderingStats for TimingStats {
    fn start_io(&self, channel: usize) {
        self.lock().io_started.insert(channel, Instant::now());
    }

    fn end_io(&self, channel: usize) {
        let mut timings = self.lock();
        if let Some(started) = timings.io_started.remove(&channel) {
            *timings.io.entry(channel).or_default() += started.elapsed();
        }
    }

    fn start_rendering(&self) {
        self.lock().rendering_started = Some(Instant::now());
    }

    fn end_rendering(&self) {
        let mut timings = self.lock();
        if let Some(started) = timings.rendering_started.take() {
            let elapsed = started.elapsed();
            timings.rendering = Some(elapsed);
            timings.renders += 1;
            let io_total: Duration = timings.io.values().sum();
            debug!(
                "rendering took {:?} (channel io {:?} across {} channels)",
                elapsed,
                io_total,
                timings.io.len()
            );
        }
    }
}
