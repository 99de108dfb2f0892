//! Smoothness aggregation for raw motion samples.
//!
//! Motion magnitudes (one per sensor tick) go into a bounded rolling window.
//! At a throttled rate the window RMS is computed, low-pass filtered across
//! emissions and rescaled into a [0, 1] stability value.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive, ensure_unit_interval, ComfortError, Result};

/// Configuration for the smoothness aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothnessConfig {
    /// Number of raw samples kept in the rolling window.
    /// Default: 64 (~1s at 60Hz)
    pub window_size: usize,

    /// Low-pass filter weight for each new RMS value, in (0, 1].
    /// Higher reacts faster, lower is steadier. Default: 0.3
    pub smoothing_alpha: f64,

    /// RMS (m/s²) mapped to zero stability. Default: 3.0
    pub rms_ceiling: f64,

    /// Minimum time between emitted readings in milliseconds.
    /// Default: 500
    pub min_emit_interval_ms: i64,

    /// Oldest reading still attributed to a location fix, in milliseconds.
    /// Must be at least `min_emit_interval_ms`. Default: 5000
    pub max_reading_age_ms: i64,
}

impl Default for SmoothnessConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            smoothing_alpha: 0.3,
            rms_ceiling: 3.0,
            min_emit_interval_ms: 500,
            max_reading_age_ms: 5_000,
        }
    }
}

impl SmoothnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(ComfortError::invalid_config(
                "window_size",
                "window must hold at least one sample",
            ));
        }
        ensure_unit_interval("smoothing_alpha", self.smoothing_alpha)?;
        if self.smoothing_alpha == 0.0 {
            return Err(ComfortError::invalid_config(
                "smoothing_alpha",
                "a zero weight would freeze the filter",
            ));
        }
        ensure_positive("rms_ceiling", self.rms_ceiling)?;
        if self.min_emit_interval_ms < 0 {
            return Err(ComfortError::invalid_config(
                "min_emit_interval_ms",
                "interval cannot be negative",
            ));
        }
        if self.max_reading_age_ms < self.min_emit_interval_ms.max(1) {
            return Err(ComfortError::invalid_config(
                "max_reading_age_ms",
                "must be positive and at least min_emit_interval_ms",
            ));
        }
        Ok(())
    }
}

/// A throttled smoothness update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothnessReading {
    pub timestamp_ms: i64,
    /// Low-pass filtered RMS of the window (roughness, ≥ 0)
    pub roughness_rms: f64,
    /// Normalized stability in [0, 1] (1 = perfectly smooth)
    pub stability: f64,
}

/// Rolling-window RMS aggregator with low-pass filtering and throttled output.
#[derive(Debug, Clone)]
pub struct SmoothnessAggregator {
    config: SmoothnessConfig,
    window: VecDeque<f64>,
    filtered_rms: Option<f64>,
    last_emit_ms: Option<i64>,
    latest: Option<SmoothnessReading>,
}

impl SmoothnessAggregator {
    /// Create an aggregator with default configuration.
    pub fn new() -> Self {
        Self::build(SmoothnessConfig::default())
    }

    /// Create an aggregator with custom configuration.
    pub fn with_config(config: SmoothnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SmoothnessConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            config,
            filtered_rms: None,
            last_emit_ms: None,
            latest: None,
        }
    }

    /// Feed one raw motion magnitude.
    ///
    /// Returns a reading only when the throttle interval has elapsed since the
    /// last emission. Non-finite samples are ignored.
    pub fn push(&mut self, timestamp_ms: i64, magnitude: f64) -> Option<SmoothnessReading> {
        if !magnitude.is_finite() {
            return None;
        }

        self.window.push_back(magnitude);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }

        let due = self
            .last_emit_ms
            .map_or(true, |last| timestamp_ms - last >= self.config.min_emit_interval_ms);
        if !due {
            return None;
        }

        let rms = window_rms(&self.window);
        let alpha = self.config.smoothing_alpha;
        let filtered = match self.filtered_rms {
            Some(previous) => alpha * rms + (1.0 - alpha) * previous,
            None => rms,
        };
        self.filtered_rms = Some(filtered);
        self.last_emit_ms = Some(timestamp_ms);

        let reading = SmoothnessReading {
            timestamp_ms,
            roughness_rms: filtered,
            stability: stability_from_rms(filtered, self.config.rms_ceiling),
        };
        self.latest = Some(reading);
        Some(reading)
    }

    /// The most recently emitted reading, if any.
    pub fn current(&self) -> Option<SmoothnessReading> {
        self.latest
    }

    /// The latest reading if it is recent enough to describe `now_ms`.
    ///
    /// Readings older than `max_reading_age_ms` describe motion that has
    /// since stopped and are not returned.
    pub fn current_at(&self, now_ms: i64) -> Option<SmoothnessReading> {
        self.latest
            .filter(|r| now_ms - r.timestamp_ms <= self.config.max_reading_age_ms)
    }

    /// Number of raw samples currently in the window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Drop all state (between ride sessions).
    pub fn reset(&mut self) {
        self.window.clear();
        self.filtered_rms = None;
        self.last_emit_ms = None;
        self.latest = None;
    }

    pub fn config(&self) -> &SmoothnessConfig {
        &self.config
    }
}

impl Default for SmoothnessAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Root-mean-square of the window (0 for an empty window).
fn window_rms(window: &VecDeque<f64>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = window.iter().map(|v| v * v).sum();
    (sum_sq / window.len() as f64).sqrt()
}

/// Map an RMS value onto [0, 1] stability.
pub fn stability_from_rms(rms: f64, ceiling: f64) -> f64 {
    1.0 - (rms / ceiling).clamp(0.0, 1.0)
}
