//! # Map Matcher
//!
//! Associates live location samples with a step of the active route.
//!
//! The steps around the previous match are tried first. When none of them is
//! close enough (or nothing matched yet) every step whose bounding box, grown
//! by the lateral threshold, contains the sample is projected. The closest
//! step wins; samples farther than the threshold from every step are dropped.

use std::ops::RangeInclusive;

use log::{debug, trace};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive, Result};
use crate::projection::{nearest_point_capped, ProjectorConfig, Projection};
use crate::route::Route;
use crate::segment_store::StepId;
use crate::{Bounds, GpsPoint};

/// Configuration for map matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Samples farther than this from every step are dropped (meters).
    /// Default: 35.0
    pub max_lateral_distance_m: f64,

    /// Steps either side of the previous match searched first.
    /// Default: 2
    pub search_window: usize,

    /// Projection settings used for each step polyline
    pub projector: ProjectorConfig,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_lateral_distance_m: 35.0,
            search_window: 2,
            projector: ProjectorConfig::default(),
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("max_lateral_distance_m", self.max_lateral_distance_m)?;
        self.projector.validate()
    }
}

/// A location fix from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
    pub point: GpsPoint,
    /// Ground speed in m/s, when the device reports one
    pub speed_mps: Option<f64>,
}

impl LocationSample {
    pub fn new(timestamp_ms: i64, point: GpsPoint) -> Self {
        Self {
            timestamp_ms,
            point,
            speed_mps: None,
        }
    }
}

/// A sample attributed to a route step, ready for the segment store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSample {
    pub step_id: StepId,
    pub projection: Projection,
    pub roughness_rms: f64,
    pub quality: f64,
    pub timestamp_ms: i64,
}

/// Step bounding box for R-tree indexing, grown by the lateral threshold.
#[derive(Debug, Clone)]
struct StepEnvelope {
    step_index: usize,
    bounds: Bounds,
}

impl RTreeObject for StepEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min_lng, self.bounds.min_lat],
            [self.bounds.max_lng, self.bounds.max_lat],
        )
    }
}

/// Stateful matcher for one active route at a time.
pub struct MapMatcher {
    config: MatcherConfig,
    route_id: Option<String>,
    steps: Vec<Vec<GpsPoint>>,
    spatial_index: RTree<StepEnvelope>,
    last_matched_step: Option<usize>,
}

impl MapMatcher {
    /// Create a matcher with default configuration.
    pub fn new() -> Self {
        Self::build(MatcherConfig::default())
    }

    /// Create a matcher with custom configuration.
    pub fn with_config(config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: MatcherConfig) -> Self {
        Self {
            config,
            route_id: None,
            steps: Vec::new(),
            spatial_index: RTree::new(),
            last_matched_step: None,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Replace the active route. All state from the previous route is dropped.
    pub fn set_route(&mut self, route: &Route) {
        let threshold = self.config.max_lateral_distance_m;
        let envelopes: Vec<StepEnvelope> = route
            .steps
            .iter()
            .enumerate()
            .filter_map(|(step_index, step)| {
                Bounds::from_points(&step.polyline).map(|b| StepEnvelope {
                    step_index,
                    bounds: b.expanded(threshold),
                })
            })
            .collect();

        self.route_id = Some(route.id.clone());
        self.steps = route.steps.iter().map(|s| s.polyline.clone()).collect();
        self.spatial_index = RTree::bulk_load(envelopes);
        self.last_matched_step = None;
        debug!(
            "[MapMatcher] Indexed {} steps for route {}",
            self.steps.len(),
            route.id
        );
    }

    /// Forget the active route.
    pub fn clear(&mut self) {
        self.route_id = None;
        self.steps.clear();
        self.spatial_index = RTree::new();
        self.last_matched_step = None;
    }

    pub fn route_id(&self) -> Option<&str> {
        self.route_id.as_deref()
    }

    pub fn last_matched_step(&self) -> Option<usize> {
        self.last_matched_step
    }

    /// Attribute a sample to a step of the active route.
    ///
    /// Returns `None` when there is no route, the sample is invalid, or it
    /// lies beyond the lateral threshold of every step.
    pub fn match_sample(
        &mut self,
        sample: &LocationSample,
        roughness_rms: f64,
        quality: f64,
    ) -> Option<MatchedSample> {
        let route_id = self.route_id.clone()?;
        if !sample.point.is_valid() {
            trace!("[MapMatcher] Dropping invalid point at {}", sample.timestamp_ms);
            return None;
        }

        let windowed = self
            .window()
            .and_then(|range| self.best_of(&sample.point, range));
        let best = match windowed {
            Some(hit) => Some(hit),
            None => {
                let candidates = self.candidates_near(&sample.point);
                self.best_of(&sample.point, candidates)
            }
        };

        let Some((step_index, projection)) = best else {
            trace!(
                "[MapMatcher] No step within {}m of sample at {}",
                self.config.max_lateral_distance_m,
                sample.timestamp_ms
            );
            return None;
        };

        self.last_matched_step = Some(step_index);
        Some(MatchedSample {
            step_id: StepId::new(route_id, step_index as u32),
            projection,
            roughness_rms,
            quality,
            timestamp_ms: sample.timestamp_ms,
        })
    }

    fn window(&self) -> Option<RangeInclusive<usize>> {
        let last = self.last_matched_step?;
        let max_index = self.steps.len().checked_sub(1)?;
        let start = last.saturating_sub(self.config.search_window);
        let end = (last + self.config.search_window).min(max_index);
        Some(start..=end)
    }

    /// Steps whose grown bounding box contains the point, in step order.
    fn candidates_near(&self, point: &GpsPoint) -> Vec<usize> {
        let query = AABB::from_point([point.longitude, point.latitude]);
        let mut indices: Vec<usize> = self
            .spatial_index
            .locate_in_envelope_intersecting(&query)
            .map(|e| e.step_index)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Closest acceptable step among `candidates` (ascending order, so ties
    /// go to the lowest index).
    fn best_of<I>(&self, point: &GpsPoint, candidates: I) -> Option<(usize, Projection)>
    where
        I: IntoIterator<Item = usize>,
    {
        let vertex_cap = self.config.projector.vertex_cap;
        let mut best: Option<(usize, Projection)> = None;
        for index in candidates {
            let Some(polyline) = self.steps.get(index) else {
                continue;
            };
            let Some(projection) = nearest_point_capped(point, polyline, vertex_cap) else {
                continue;
            };
            if projection.distance_m > self.config.max_lateral_distance_m {
                continue;
            }
            let closer = best.map_or(true, |(_, b)| projection.distance_m < b.distance_m);
            if closer {
                best = Some((index, projection));
            }
        }
        best
    }
}

impl Default for MapMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteStep;

    /// Three steps heading east along one parallel, ~70 m each.
    fn straight_route(id: &str) -> Route {
        let steps = (0..3)
            .map(|i| {
                let start = -0.120 + i as f64 * 0.001;
                RouteStep::new(
                    vec![
                        GpsPoint::new(51.5, start),
                        GpsPoint::new(51.5, start + 0.001),
                    ],
                    None,
                )
            })
            .collect();
        Route::new(id, steps)
    }

    fn sample(ts: i64, lat: f64, lng: f64) -> LocationSample {
        LocationSample::new(ts, GpsPoint::new(lat, lng))
    }

    #[test]
    fn test_matches_nearest_step() {
        let mut matcher = MapMatcher::new();
        matcher.set_route(&straight_route("r1"));

        let matched = matcher
            .match_sample(&sample(0, 51.50005, -0.1185), 0.8, 0.7)
            .unwrap();
        assert_eq!(matched.step_id, StepId::new("r1", 1));
        assert!(matched.projection.distance_m < 10.0);
        assert_eq!(matched.roughness_rms, 0.8);
        assert_eq!(matcher.last_matched_step(), Some(1));
    }

    #[test]
    fn test_rejects_off_route_samples() {
        let mut matcher = MapMatcher::new();
        matcher.set_route(&straight_route("r1"));
        // ~110 m north of the route
        assert!(matcher.match_sample(&sample(0, 51.501, -0.1185), 0.8, 0.7).is_none());
        assert!(matcher.last_matched_step().is_none());
    }

    #[test]
    fn test_drops_without_route_or_with_invalid_point() {
        let mut matcher = MapMatcher::new();
        assert!(matcher.match_sample(&sample(0, 51.5, -0.1185), 0.8, 0.7).is_none());

        matcher.set_route(&straight_route("r1"));
        assert!(matcher.match_sample(&sample(0, f64::NAN, -0.1185), 0.8, 0.7).is_none());
        assert!(matcher.match_sample(&sample(0, 95.0, -0.1185), 0.8, 0.7).is_none());
    }

    #[test]
    fn test_shared_vertex_tie_goes_to_lower_step() {
        let mut matcher = MapMatcher::new();
        matcher.set_route(&straight_route("r1"));
        // Exactly on the joint between step 0 and step 1
        let matched = matcher.match_sample(&sample(0, 51.5, -0.119), 0.1, 0.9).unwrap();
        assert_eq!(matched.step_id.step_index, 0);
    }

    #[test]
    fn test_window_falls_back_to_whole_route() {
        let mut matcher = MapMatcher::with_config(MatcherConfig {
            search_window: 0,
            ..MatcherConfig::default()
        })
        .unwrap();
        matcher.set_route(&straight_route("r1"));

        matcher.match_sample(&sample(0, 51.5, -0.1195), 0.1, 0.9).unwrap();
        assert_eq!(matcher.last_matched_step(), Some(0));
        // Jump two steps ahead; the window only holds step 0
        let matched = matcher.match_sample(&sample(1, 51.5, -0.1175), 0.1, 0.9).unwrap();
        assert_eq!(matched.step_id.step_index, 2);
    }

    #[test]
    fn test_route_replacement_resets_state() {
        let mut matcher = MapMatcher::new();
        matcher.set_route(&straight_route("r1"));
        matcher.match_sample(&sample(0, 51.5, -0.1185), 0.1, 0.9).unwrap();

        matcher.set_route(&straight_route("r2"));
        assert!(matcher.last_matched_step().is_none());
        let matched = matcher.match_sample(&sample(1, 51.5, -0.1185), 0.1, 0.9).unwrap();
        assert_eq!(matched.step_id.route_id, "r2");

        matcher.clear();
        assert!(matcher.route_id().is_none());
        assert!(matcher.match_sample(&sample(2, 51.5, -0.1185), 0.1, 0.9).is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MatcherConfig {
            max_lateral_distance_m: 0.0,
            ..MatcherConfig::default()
        };
        assert!(MapMatcher::with_config(config).is_err());

        let config = MatcherConfig {
            projector: ProjectorConfig { vertex_cap: 1 },
            ..MatcherConfig::default()
        };
        assert!(MapMatcher::with_config(config).is_err());
    }
}
