//! # Comfort Engine
//!
//! Stateful ride session that keeps the active route, its static context and
//! the live segment statistics together.
//!
//! ## Architecture
//!
//! The engine wires the pieces of a ride together:
//! - Motion samples feed the smoothness aggregator
//! - Location samples are matched to a step and blended into the segment store
//! - Scores are recomputed on demand from the baseline and the store
//!
//! There is no push-based reactivity. Callers drain [`EngineEvent`]s and pull
//! [`ComfortEngine::live_scores`] when they redraw. The store is shared behind
//! an `Arc` so a renderer can read it without going through the engine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, trace};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::context::{ContextualStep, StepContext};
use crate::error::{ensure_unit_interval, Result};
use crate::map_matcher::{LocationSample, MapMatcher, MatchedSample, MatcherConfig};
use crate::projection::RouteProgress;
use crate::route::Route;
use crate::scoring::{RideMode, ScoreBreakdown, Scorer, ScoringConfig};
use crate::segment_store::{SegmentStore, StepId, StoreConfig, WriteOutcome};
use crate::smoothness::{SmoothnessAggregator, SmoothnessConfig, SmoothnessReading};
use crate::GpsPoint;

/// Queued events beyond this are dropped oldest first.
const MAX_PENDING_EVENTS: usize = 1024;

// ============================================================================
// Core Types
// ============================================================================

/// Aggregate configuration for a ride session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub matcher: MatcherConfig,
    pub store: StoreConfig,
    pub smoothness: SmoothnessConfig,
    pub scoring: ScoringConfig,
    /// Ride mode used until changed. Default: Smoothness
    pub mode: RideMode,
    /// Quality that stale statistics fade toward, in [0, 1]. Default: 0.5
    pub neutral_quality: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            store: StoreConfig::default(),
            smoothness: SmoothnessConfig::default(),
            scoring: ScoringConfig::default(),
            mode: RideMode::default(),
            neutral_quality: 0.5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.matcher.validate()?;
        self.store.validate()?;
        self.smoothness.validate()?;
        self.scoring.validate()?;
        ensure_unit_interval("neutral_quality", self.neutral_quality)
    }
}

/// Engine event types for notifying the caller of changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    RouteLoaded { route_id: String, step_count: usize },
    StepUpdated { step_id: StepId, score: f64 },
    RouteCleared,
    SessionReset,
}

/// Current comfort of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepScore {
    pub step_id: StepId,
    /// Display instruction with comfort hints
    pub instruction: String,
    /// Score from static context alone
    pub baseline: f64,
    /// Live score: baseline pulled toward the measured score by freshness
    pub score: f64,
    /// Freshness of the measured data (0 when nothing was measured)
    pub freshness: f64,
    /// Measured quality faded toward neutral, if the step was ridden
    pub quality: Option<f64>,
    pub breakdown: ScoreBreakdown,
}

/// Counters for the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub route_steps: usize,
    pub tracked_steps: usize,
    pub motion_samples: u64,
    pub matched_samples: u64,
    pub dropped_samples: u64,
    pub discarded_writes: u64,
}

// ============================================================================
// Comfort Engine
// ============================================================================

/// Live comfort scoring for one route at a time.
pub struct ComfortEngine {
    config: EngineConfig,
    matcher: MapMatcher,
    aggregator: SmoothnessAggregator,
    store: Arc<SegmentStore>,
    scorer: Scorer,
    mode: RideMode,

    route: Option<Route>,
    steps: Vec<ContextualStep>,
    baselines: Vec<ScoreBreakdown>,

    events: VecDeque<EngineEvent>,
    stats: EngineStats,
}

impl ComfortEngine {
    /// Create an engine with default configuration.
    pub fn new() -> Self {
        let config = EngineConfig::default();
        Self {
            matcher: MapMatcher::new(),
            aggregator: SmoothnessAggregator::new(),
            store: Arc::new(SegmentStore::new()),
            scorer: Scorer::default(),
            mode: config.mode,
            config,
            route: None,
            steps: Vec::new(),
            baselines: Vec::new(),
            events: VecDeque::new(),
            stats: EngineStats::default(),
        }
    }

    /// Create an engine with custom configuration.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            matcher: MapMatcher::with_config(config.matcher.clone())?,
            aggregator: SmoothnessAggregator::with_config(config.smoothness.clone())?,
            store: Arc::new(SegmentStore::with_config(config.store.clone())?),
            scorer: Scorer::new(config.scoring)?,
            mode: config.mode,
            config,
            route: None,
            steps: Vec::new(),
            baselines: Vec::new(),
            events: VecDeque::new(),
            stats: EngineStats::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Route Lifecycle
    // ========================================================================

    /// Make `route` the active route.
    ///
    /// `steps` is the context built for it; steps without context are scored
    /// as neutral. Statistics of the previous route are dropped and late
    /// writes for it are rejected by the store.
    pub fn load_route(&mut self, route: Route, steps: Vec<ContextualStep>) {
        let steps = align_steps(&route, steps);
        self.store.begin_route(&route.id);
        self.matcher.set_route(&route);
        self.baselines = self.scorer.score_steps(self.mode, &steps);
        self.steps = steps;

        info!(
            "[ComfortEngine] Loaded route {} with {} steps",
            route.id,
            route.step_count()
        );
        self.push_event(EngineEvent::RouteLoaded {
            route_id: route.id.clone(),
            step_count: route.step_count(),
        });
        self.route = Some(route);
    }

    /// Drop the active route and its statistics.
    pub fn clear_route(&mut self) {
        self.drop_route();
        info!("[ComfortEngine] Route cleared");
        self.push_event(EngineEvent::RouteCleared);
    }

    /// End the ride session: drop the route, motion history and counters.
    pub fn reset_session(&mut self) {
        self.drop_route();
        self.aggregator.reset();
        self.stats = EngineStats::default();
        info!("[ComfortEngine] Session reset");
        self.push_event(EngineEvent::SessionReset);
    }

    fn drop_route(&mut self) {
        self.store.clear();
        self.matcher.clear();
        self.route = None;
        self.steps.clear();
        self.baselines.clear();
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    pub fn route_id(&self) -> Option<&str> {
        self.route.as_ref().map(|r| r.id.as_str())
    }

    /// Static context of the active route, in step order.
    pub fn steps(&self) -> &[ContextualStep] {
        &self.steps
    }

    // ========================================================================
    // Ride Mode
    // ========================================================================

    pub fn ride_mode(&self) -> RideMode {
        self.mode
    }

    /// Switch the weighting preset. Baselines are recomputed; measured data
    /// is kept.
    pub fn set_ride_mode(&mut self, mode: RideMode) {
        if mode == self.mode {
            return;
        }
        self.mode = mode;
        self.baselines = self.scorer.score_steps(mode, &self.steps);
        debug!("[ComfortEngine] Ride mode set to {}", mode);
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Feed one raw motion magnitude. Returns a reading when one is emitted.
    pub fn record_motion(&mut self, timestamp_ms: i64, magnitude: f64) -> Option<SmoothnessReading> {
        self.stats.motion_samples += 1;
        self.aggregator.push(timestamp_ms, magnitude)
    }

    /// Latest smoothness reading.
    pub fn current_smoothness(&self) -> Option<SmoothnessReading> {
        self.aggregator.current()
    }

    /// Match a location sample against the active route and blend the current
    /// roughness into the matched step.
    ///
    /// Returns the step's updated score, or `None` when the sample was dropped.
    /// Samples with no motion reading within `max_reading_age_ms` are dropped.
    pub fn record_location(&mut self, sample: &LocationSample) -> Option<StepScore> {
        let Some(reading) = self.aggregator.current_at(sample.timestamp_ms) else {
            trace!(
                "[ComfortEngine] No recent motion reading, dropping sample at {}",
                sample.timestamp_ms
            );
            self.stats.dropped_samples += 1;
            return None;
        };

        match self
            .matcher
            .match_sample(sample, reading.roughness_rms, reading.stability)
        {
            Some(matched) => self.commit(&matched),
            None => {
                self.stats.dropped_samples += 1;
                None
            }
        }
    }

    /// Write a matched sample to the store and rescore its step.
    ///
    /// Samples matched against a route that is no longer active are discarded.
    pub fn commit(&mut self, matched: &MatchedSample) -> Option<StepScore> {
        let outcome = self.store.write(
            &matched.step_id,
            matched.roughness_rms,
            matched.quality,
            matched.timestamp_ms,
        );
        match outcome {
            WriteOutcome::Discarded => {
                self.stats.discarded_writes += 1;
                None
            }
            WriteOutcome::Created { .. } | WriteOutcome::Blended => {
                self.stats.matched_samples += 1;
                let score = self.step_score(
                    matched.step_id.step_index as usize,
                    matched.timestamp_ms,
                )?;
                self.push_event(EngineEvent::StepUpdated {
                    step_id: matched.step_id.clone(),
                    score: score.score,
                });
                Some(score)
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current score of step `index`, with freshness computed at `now_ms`.
    pub fn step_score(&self, index: usize, now_ms: i64) -> Option<StepScore> {
        let route = self.route.as_ref()?;
        let step = self.steps.get(index)?;
        let baseline = *self.baselines.get(index)?;
        let step_id = route.step_id(index);

        let Some(stat) = self.store.read_at(&step_id, now_ms) else {
            return Some(StepScore {
                step_id,
                instruction: step.instruction.clone(),
                baseline: baseline.score,
                score: baseline.score,
                freshness: 0.0,
                quality: None,
                breakdown: baseline,
            });
        };

        let slope = self.scorer.slope_penalty(step.context.grade_percent);
        let (measured, breakdown) =
            self.scorer
                .step_score(stat.roughness_rms, slope, self.mode, &step.context);
        let score = baseline.score + (measured - baseline.score) * stat.freshness;

        Some(StepScore {
            step_id,
            instruction: step.instruction.clone(),
            baseline: baseline.score,
            score,
            freshness: stat.freshness,
            quality: Some(stat.effective_quality(self.config.neutral_quality)),
            breakdown,
        })
    }

    /// Scores of every step of the active route, in step order.
    pub fn live_scores(&self, now_ms: i64) -> Vec<StepScore> {
        (0..self.steps.len())
            .filter_map(|index| self.step_score(index, now_ms))
            .collect()
    }

    /// Live scores as JSON.
    pub fn get_scores_json(&self, now_ms: i64) -> String {
        serde_json::to_string(&self.live_scores(now_ms)).unwrap_or_else(|_| "[]".to_string())
    }

    /// Progress of a point along the active route.
    pub fn progress(&self, point: &GpsPoint) -> Option<RouteProgress> {
        self.route.as_ref()?.progress(point)
    }

    /// Shared handle to the segment store for renderers.
    pub fn store(&self) -> Arc<SegmentStore> {
        Arc::clone(&self.store)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            route_steps: self.steps.len(),
            tracked_steps: self.store.len(),
            ..self.stats
        }
    }

    /// Take all pending events, oldest first.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    fn push_event(&mut self, event: EngineEvent) {
        if self.events.len() >= MAX_PENDING_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

impl Default for ComfortEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// One context entry per route step, in step order. Missing entries get a
/// neutral context and the provider's instruction.
fn align_steps(route: &Route, steps: Vec<ContextualStep>) -> Vec<ContextualStep> {
    let mut by_index: Vec<Option<ContextualStep>> = vec![None; route.step_count()];
    for step in steps {
        if let Some(slot) = by_index.get_mut(step.step_index as usize) {
            *slot = Some(step);
        }
    }
    by_index
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            step.unwrap_or_else(|| ContextualStep {
                step_index: index as u32,
                context: StepContext::default(),
                instruction: route.steps[index].instruction.clone().unwrap_or_default(),
            })
        })
        .collect()
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Global engine instance shared by the platform shells.
pub static ENGINE: Lazy<Mutex<ComfortEngine>> = Lazy::new(|| Mutex::new(ComfortEngine::new()));

/// Run `f` with the global engine locked.
pub fn with_engine<F, R>(f: F) -> R
where
    F: FnOnce(&mut ComfortEngine) -> R,
{
    let mut engine = ENGINE.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut engine)
}
