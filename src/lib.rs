//! # Ride Comfort
//!
//! Live per-step ride comfort scoring for turn-by-turn routes.
//!
//! This library provides:
//! - Projection of noisy GPS samples onto route geometry
//! - Rolling roughness aggregation from motion sensors
//! - A bounded, time-decaying store of per-step statistics
//! - A deterministic multi-factor comfort score per route step
//!
//! ## Features
//!
//! - **`parallel`** - Score long routes in parallel with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use ride_comfort::{ComfortEngine, GpsPoint, LocationSample, Route, RouteStep};
//!
//! let step = RouteStep::new(
//!     vec![GpsPoint::new(51.5000, -0.1200), GpsPoint::new(51.5000, -0.1190)],
//!     Some("Head east".to_string()),
//! );
//! let route = Route::new("route-1", vec![step]);
//!
//! let mut engine = ComfortEngine::new();
//! engine.load_route(route, Vec::new());
//!
//! // Motion first, then a location fix on the route
//! engine.record_motion(0, 0.4);
//! let sample = LocationSample::new(100, GpsPoint::new(51.5000, -0.1195));
//! if let Some(score) = engine.record_location(&sample) {
//!     println!("{}: {:.2}", score.step_id, score.score);
//! }
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ComfortError, Result};

// Geographic utilities (distance, bearings, local frames)
pub mod geo_utils;

// Nearest-point projection and route progress
pub mod projection;
pub use projection::{
    nearest_point, progress, snap, Projection, ProjectorConfig, RouteProgress,
    DEFAULT_VERTEX_CAP,
};

// Routes and steps from the routing provider
pub mod route;
pub use route::{Route, RouteStep};

// Motion smoothing
pub mod smoothness;
pub use smoothness::{SmoothnessAggregator, SmoothnessConfig, SmoothnessReading};

// Per-step statistics shared between ingestion and rendering
pub mod segment_store;
pub use segment_store::{SegmentStat, SegmentStore, StepId, StoreConfig, WriteOutcome};

// Sample to step association
pub mod map_matcher;
pub use map_matcher::{LocationSample, MapMatcher, MatchedSample, MatcherConfig};

// Static step context from attribute and elevation providers
pub mod context;
pub use context::{
    compose_instruction, AttributeProvider, ContextualStep, ElevationProvider, GradeSummary,
    RouteContextBuilder, StepContext, StepTags,
};

// Comfort scoring
pub mod scoring;
pub use scoring::{step_score, RideMode, ScoreBreakdown, Scorer, ScoringConfig};

// LRU cache for memoizing provider lookups
pub mod lru_cache;
pub use lru_cache::{LruCache, SharedLruCache};

// Stateful ride engine (singleton with all session state)
pub mod engine;
pub use engine::{
    with_engine, ComfortEngine, EngineConfig, EngineEvent, EngineStats, StepScore, ENGINE,
};

// Async ingestion loop
pub mod ingest;
pub use ingest::{run_ingestion, IngestSummary, RoutePlan, SensorEvent};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use ride_comfort::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Grow the bounds by `meters` on every side.
    ///
    /// The longitude margin is computed at the latitude farthest from the
    /// equator so the box never falls short.
    pub fn expanded(&self, meters: f64) -> Self {
        let widest_lat = if self.max_lat.abs() > self.min_lat.abs() {
            self.max_lat
        } else {
            self.min_lat
        };
        let (dlat, dlng) = geo_utils::meters_to_degrees(meters, widest_lat);
        Self {
            min_lat: self.min_lat - dlat,
            max_lat: self.max_lat + dlat,
            min_lng: self.min_lng - dlng,
            max_lng: self.max_lng + dlng,
        }
    }

    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}
