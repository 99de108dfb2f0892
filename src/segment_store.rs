//! # Segment Store
//!
//! Bounded, time-decaying store of per-step ride statistics.
//!
//! Written by the map matcher (background ingestion) and read by the renderer
//! and scorer (foreground). Every operation takes the same mutex, so a reader
//! either sees a blend completely applied or not at all.
//!
//! Eviction is stale-first: when a new step must be tracked at capacity, the
//! entry with the lowest freshness goes, regardless of how recently it was
//! read.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive, ensure_unit_interval, ComfortError, Result};

/// Stable identifier of a route step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId {
    pub route_id: String,
    pub step_index: u32,
}

impl StepId {
    pub fn new(route_id: impl Into<String>, step_index: u32) -> Self {
        Self {
            route_id: route_id.into(),
            step_index,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.route_id, self.step_index)
    }
}

/// Per-step statistic as seen by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentStat {
    /// Smoothed ride quality in [0, 1]
    pub quality: f64,
    /// Smoothed roughness RMS (m/s², ≥ 0)
    pub roughness_rms: f64,
    /// Unix timestamp (ms) of the last blended sample
    pub last_updated_ms: i64,
    /// Number of samples blended into this statistic
    pub sample_count: u32,
    /// Confidence in [0, 1], recomputed at read time
    pub freshness: f64,
}

impl SegmentStat {
    /// Quality faded toward `neutral` as freshness decays.
    pub fn effective_quality(&self, neutral: f64) -> f64 {
        neutral + (self.quality - neutral) * self.freshness
    }
}

/// Configuration for the segment store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of tracked steps. Default: 512
    pub capacity: usize,

    /// Weight of a new sample in the exponential blend, in (0.5, 1].
    /// Must exceed 0.5 so new data outweighs history. Default: 0.6
    pub blend_weight: f64,

    /// Time after which a statistic has no freshness left (ms).
    /// Default: 30 minutes
    pub freshness_horizon_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            blend_weight: 0.6,
            freshness_horizon_ms: 30 * 60 * 1000,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ComfortError::invalid_config(
                "capacity",
                "store must track at least one step",
            ));
        }
        ensure_unit_interval("blend_weight", self.blend_weight)?;
        if self.blend_weight <= 0.5 {
            return Err(ComfortError::invalid_config(
                "blend_weight",
                "new samples must outweigh history (expected > 0.5)",
            ));
        }
        ensure_positive("freshness_horizon_ms", self.freshness_horizon_ms as f64)?;
        Ok(())
    }

    /// Freshness after `elapsed_ms`: 1 when just written, 0 at the horizon.
    pub fn freshness(&self, elapsed_ms: i64) -> f64 {
        let elapsed = elapsed_ms.max(0) as f64;
        (1.0 - elapsed / self.freshness_horizon_ms as f64).clamp(0.0, 1.0)
    }
}

/// What a write did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// A new statistic was created, possibly evicting the stalest one
    Created { evicted: Option<StepId> },
    /// The sample was blended into an existing statistic
    Blended,
    /// The sample was dropped (inactive route, cleared store or non-finite
    /// values)
    Discarded,
}

#[derive(Debug, Clone, Copy)]
struct SegmentEntry {
    quality: f64,
    roughness_rms: f64,
    last_updated_ms: i64,
    sample_count: u32,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<StepId, SegmentEntry>,
    active_route: Option<String>,
    /// Set by `clear` until the next `begin_route`; every write is rejected.
    closed: bool,
}

/// Thread-safe store of per-step statistics.
#[derive(Debug)]
pub struct SegmentStore {
    config: StoreConfig,
    state: Mutex<StoreState>,
}

impl SegmentStore {
    /// Create a store with default configuration.
    pub fn new() -> Self {
        Self::build(StoreConfig::default())
    }

    /// Create a store with custom configuration.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Entries are plain values replaced in one assignment; a poisoned lock
        // still guards a consistent map.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Drop all statistics and only accept writes for `route_id` from now on.
    ///
    /// Writes still in flight for the previous route are discarded.
    pub fn begin_route(&self, route_id: &str) {
        let mut state = self.lock();
        state.entries.clear();
        state.active_route = Some(route_id.to_string());
        state.closed = false;
    }

    /// The route currently accepted by the store.
    pub fn active_route(&self) -> Option<String> {
        self.lock().active_route.clone()
    }

    /// Drop all statistics and any route binding.
    ///
    /// Writes are rejected until the next [`SegmentStore::begin_route`], so
    /// samples still in flight for the old route cannot repopulate the store.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.active_route = None;
        state.closed = true;
    }

    /// True between `clear` and the next `begin_route`.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Blend a sample into the statistic for `step_id`.
    pub fn write(&self, step_id: &StepId, roughness_rms: f64, quality: f64, at_ms: i64) -> WriteOutcome {
        if !roughness_rms.is_finite() || !quality.is_finite() {
            return WriteOutcome::Discarded;
        }
        let roughness_rms = roughness_rms.max(0.0);
        let quality = quality.clamp(0.0, 1.0);

        let mut state = self.lock();
        if state.closed {
            debug!("[SegmentStore] Discarding write for {} (store cleared)", step_id);
            return WriteOutcome::Discarded;
        }
        if let Some(active) = &state.active_route {
            if *active != step_id.route_id {
                debug!(
                    "[SegmentStore] Discarding write for {} (active route {})",
                    step_id, active
                );
                return WriteOutcome::Discarded;
            }
        }

        let new_weight = self.config.blend_weight;
        if let Some(entry) = state.entries.get_mut(step_id) {
            // A sample older than the statistic is history, not new data
            let weight = if at_ms < entry.last_updated_ms {
                1.0 - new_weight
            } else {
                new_weight
            };
            entry.roughness_rms = weight * roughness_rms + (1.0 - weight) * entry.roughness_rms;
            entry.quality = weight * quality + (1.0 - weight) * entry.quality;
            entry.last_updated_ms = entry.last_updated_ms.max(at_ms);
            entry.sample_count = entry.sample_count.saturating_add(1);
            return WriteOutcome::Blended;
        }

        let evicted = if state.entries.len() >= self.config.capacity {
            let stalest = stalest_key(&state.entries, &self.config, at_ms);
            if let Some(key) = &stalest {
                state.entries.remove(key);
                debug!("[SegmentStore] Evicted stalest step {}", key);
            }
            stalest
        } else {
            None
        };

        state.entries.insert(
            step_id.clone(),
            SegmentEntry {
                quality,
                roughness_rms,
                last_updated_ms: at_ms,
                sample_count: 1,
            },
        );
        WriteOutcome::Created { evicted }
    }

    /// Read the statistic for `step_id` with freshness computed at `now_ms`.
    pub fn read_at(&self, step_id: &StepId, now_ms: i64) -> Option<SegmentStat> {
        let state = self.lock();
        state
            .entries
            .get(step_id)
            .map(|entry| to_stat(entry, &self.config, now_ms))
    }

    /// Read the statistic for `step_id` with freshness computed now.
    pub fn read(&self, step_id: &StepId) -> Option<SegmentStat> {
        self.read_at(step_id, now_millis())
    }

    /// Every tracked statistic, taken under a single lock, sorted by step.
    pub fn snapshot(&self, now_ms: i64) -> Vec<(StepId, SegmentStat)> {
        let state = self.lock();
        let mut stats: Vec<(StepId, SegmentStat)> = state
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), to_stat(entry, &self.config, now_ms)))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn contains(&self, step_id: &StepId) -> bool {
        self.lock().entries.contains_key(step_id)
    }
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn to_stat(entry: &SegmentEntry, config: &StoreConfig, now_ms: i64) -> SegmentStat {
    SegmentStat {
        quality: entry.quality,
        roughness_rms: entry.roughness_rms,
        last_updated_ms: entry.last_updated_ms,
        sample_count: entry.sample_count,
        freshness: config.freshness(now_ms - entry.last_updated_ms),
    }
}

/// Lowest freshness first; equal freshness falls back to the oldest update,
/// then the lowest step.
fn stalest_key(
    entries: &HashMap<StepId, SegmentEntry>,
    config: &StoreConfig,
    now_ms: i64,
) -> Option<StepId> {
    entries
        .iter()
        .min_by(|(id_a, a), (id_b, b)| {
            let fresh_a = config.freshness(now_ms - a.last_updated_ms);
            let fresh_b = config.freshness(now_ms - b.last_updated_ms);
            fresh_a
                .total_cmp(&fresh_b)
                .then(a.last_updated_ms.cmp(&b.last_updated_ms))
                .then_with(|| id_a.cmp(id_b))
        })
        .map(|(id, _)| id.clone())
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
