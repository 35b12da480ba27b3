//! Process memory leak detection
//!
//! Two complementary checks:
//! - [`LeakTracker`]: growth rate between consecutive leak-detection ticks,
//!   compared against a bytes/sec threshold
//! - [`LeakDetector`]: least-squares slope over a window of samples, with
//!   monotonicity and R² to tell a steady climb from noise

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Growth rate (bytes/sec) above which a tick counts as leaking
pub const DEFAULT_LEAK_THRESHOLD: f64 = 1024.0;

/// Minimum samples required for a trend verdict
const MIN_SAMPLES_FOR_TREND: usize = 10;

/// Fraction of steps that must be non-decreasing for a trend to count
const MONOTONICITY_THRESHOLD: f64 = 0.95;

/// Samples kept for trend analysis
const MAX_TREND_SAMPLES: usize = 1440;

/// Tracks consecutive process memory readings
#[derive(Debug, Clone)]
pub struct LeakTracker {
    threshold: f64,
    last: Option<(Instant, u64)>,
    samples: VecDeque<(DateTime<Utc>, u64)>,
}

impl Default for LeakTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LEAK_THRESHOLD)
    }
}

impl LeakTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last: None,
            samples: VecDeque::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Record a reading. Returns the growth rate since the previous reading
    /// in bytes/sec, or `None` for the first reading.
    pub fn record(&mut self, at: Instant, bytes: u64) -> Option<f64> {
        self.samples.push_back((Utc::now(), bytes));
        while self.samples.len() > MAX_TREND_SAMPLES {
            self.samples.pop_front();
        }

        let previous = self.last.replace((at, bytes));
        let (prev_at, prev_bytes) = previous?;

        let secs = at.duration_since(prev_at).as_secs_f64();
        if secs <= 0.0 {
            return None;
        }

        Some((bytes as f64 - prev_bytes as f64) / secs)
    }

    /// True when a rate exceeds the configured threshold. A threshold of
    /// zero or below disables the check.
    pub fn is_leaking(&self, rate: f64) -> bool {
        self.threshold > 0.0 && rate > self.threshold
    }

    pub fn samples(&self) -> Vec<(DateTime<Utc>, u64)> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.last = None;
        self.samples.clear();
    }
}

/// Linear-regression trend detector
#[derive(Debug, Clone)]
pub struct LeakDetector {
    /// Only samples this close to the newest one are analyzed
    pub window: Duration,
    /// Minimum slope (bytes/sec) to report a leak
    pub slope_threshold: f64,
}

impl Default for LeakDetector {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            slope_threshold: DEFAULT_LEAK_THRESHOLD,
        }
    }
}

/// Result of a positive trend analysis
#[derive(Debug, Clone, PartialEq)]
pub struct LeakTrend {
    pub slope_bytes_per_sec: f64,
    pub r_squared: f64,
    pub monotonicity: f64,
    pub current_bytes: u64,
    pub samples_analyzed: usize,
}

impl LeakTrend {
    pub fn mb_per_hour(&self) -> f64 {
        self.slope_bytes_per_sec * 3600.0 / (1024.0 * 1024.0)
    }
}

impl LeakDetector {
    pub fn new(window: Duration, slope_threshold: f64) -> Self {
        Self {
            window,
            slope_threshold,
        }
    }

    /// Analyze samples sorted by timestamp
    pub fn detect(&self, samples: &[(DateTime<Utc>, u64)]) -> Option<LeakTrend> {
        let latest = samples.last()?.0;
        let window = chrono::Duration::from_std(self.window).ok()?;
        let points: Vec<(f64, f64)> = samples
            .iter()
            .filter(|(ts, _)| *ts >= latest - window)
            .map(|(ts, bytes)| {
                let x = (*ts - samples[0].0).num_milliseconds() as f64 / 1000.0;
                (x, *bytes as f64)
            })
            .collect();

        if points.len() < MIN_SAMPLES_FOR_TREND {
            return None;
        }

        let (slope, intercept) = linear_fit(&points)?;
        if slope <= self.slope_threshold {
            return None;
        }

        let monotonicity = monotonicity(&points);
        if monotonicity < MONOTONICITY_THRESHOLD {
            return None;
        }

        Some(LeakTrend {
            slope_bytes_per_sec: slope,
            r_squared: r_squared(&points, slope, intercept),
            monotonicity,
            current_bytes: samples.last().map(|(_, b)| *b).unwrap_or(0),
            samples_analyzed: points.len(),
        })
    }
}

/// Least-squares slope and intercept
fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

fn r_squared(points: &[(f64, f64)], slope: f64, intercept: f64) -> f64 {
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / points.len() as f64;
    let (ss_res, ss_tot) = points.iter().fold((0.0, 0.0), |(res, tot), (x, y)| {
        let predicted = slope * x + intercept;
        (res + (y - predicted).powi(2), tot + (y - mean_y).powi(2))
    });

    if ss_tot.abs() < f64::EPSILON {
        return 0.0;
    }
    1.0 - ss_res / ss_tot
}

fn monotonicity(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let rising = points.windows(2).filter(|w| w[1].1 >= w[0].1).count();
    rising as f64 / (points.len() - 1) as f64
}
