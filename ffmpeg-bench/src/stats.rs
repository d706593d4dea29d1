//! Latency bookkeeping for the benchmark loops.
//!
//! Every stage keeps a short windowed mean over the last K samples, a
//! second, longer windowed mean fed with the first one's value (a "group of
//! pictures" view), and a percentile
//! estimator over every sample recorded during the run.

use std::collections::VecDeque;
use std::time::Instant;

/// Samples behind the per-frame mean.
pub const DEFAULT_WINDOW: usize = 50;
/// Per-frame means behind the per-GOP mean.
pub const DEFAULT_GOP_WINDOW: usize = 200;

/// Mean over the last `window` samples.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub fn add(&mut self, value: f64) {
        self.samples.push_back(value);
        self.sum += value;
        if self.samples.len() > self.window {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
    }

    /// Mean of the retained samples, 0.0 when nothing was recorded.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.sum / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

/// Percentile over all recorded samples using linear interpolation between
/// closest ranks (rank = q * (n - 1)).
#[derive(Debug, Clone, Default)]
pub struct Percentile {
    samples: Vec<f64>,
}

impl Percentile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.samples.push(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `q` is clamped to [0, 1]. Returns 0.0 when empty.
    pub fn value(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);

        let q = q.clamp(0.0, 1.0);
        let rank = q * (sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        if lower == upper {
            return sorted[lower];
        }
        let weight = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * weight
    }
}

/// Wall-clock stopwatch reporting milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn restart(&mut self) {
        self.start = Instant::now();
    }
}

/// Per-stage latency tracker.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    frame: MovingAverage,
    gop: MovingAverage,
    all: Percentile,
}

impl LatencyTracker {
    pub fn new(frame_window: usize, gop_window: usize) -> Self {
        Self {
            frame: MovingAverage::new(frame_window),
            gop: MovingAverage::new(gop_window),
            all: Percentile::new(),
        }
    }

    pub fn record(&mut self, ms: f64) {
        self.frame.add(ms);
        self.gop.add(self.frame.mean());
        self.all.add(ms);
    }

    pub fn frame_ms(&self) -> f64 {
        self.frame.mean()
    }

    pub fn gop_ms(&self) -> f64 {
        self.gop.mean()
    }

    pub fn percentile(&self, q: f64) -> f64 {
        self.all.value(q)
    }

    pub fn samples(&self) -> usize {
        self.all.len()
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_GOP_WINDOW)
    }
}
