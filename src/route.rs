//! Route and step types supplied by the external routing provider.

use serde::{Deserialize, Serialize};

use crate::error::{ComfortError, Result};
use crate::geo_utils::polyline_length;
use crate::projection::{progress, RouteProgress};
use crate::segment_store::StepId;
use crate::{Bounds, GpsPoint};

/// One maneuver-bounded piece of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    /// Step geometry
    pub polyline: Vec<GpsPoint>,
    /// Maneuver text from the routing provider (e.g. "Turn right")
    pub instruction: Option<String>,
    /// Step length in meters
    pub distance_m: f64,
    /// Expected travel time in seconds
    pub duration_s: f64,
}

impl RouteStep {
    /// Create a step, measuring its length from the geometry.
    pub fn new(polyline: Vec<GpsPoint>, instruction: Option<String>) -> Self {
        let distance_m = polyline_length(&polyline);
        Self {
            polyline,
            instruction,
            distance_m,
            duration_s: 0.0,
        }
    }

    /// Create a step from an encoded polyline (precision 5 for Google/OSRM,
    /// 6 for Valhalla).
    pub fn from_encoded(encoded: &str, precision: u32, instruction: Option<String>) -> Result<Self> {
        let line = polyline::decode_polyline(encoded, precision).map_err(|e| {
            ComfortError::InvalidPolyline {
                message: e.to_string(),
            }
        })?;
        let points: Vec<GpsPoint> = line.coords().map(|c| GpsPoint::new(c.y, c.x)).collect();
        if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
            return Err(ComfortError::InvalidPolyline {
                message: format!(
                    "decoded coordinate ({}, {}) is out of range",
                    bad.latitude, bad.longitude
                ),
            });
        }
        Ok(Self::new(points, instruction))
    }

    /// Set the expected travel time.
    pub fn with_duration(mut self, duration_s: f64) -> Self {
        self.duration_s = duration_s;
        self
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.polyline)
    }
}

/// A complete route as returned by the routing provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Unique identifier; step identifiers are derived from it
    pub id: String,
    pub steps: Vec<RouteStep>,
    /// Total distance in meters
    pub total_distance_m: f64,
    /// Total duration in seconds
    pub total_duration_s: f64,
}

impl Route {
    /// Create a route, summing distance and duration over its steps.
    pub fn new(id: impl Into<String>, steps: Vec<RouteStep>) -> Self {
        let total_distance_m = steps.iter().map(|s| s.distance_m).sum();
        let total_duration_s = steps.iter().map(|s| s.duration_s).sum();
        Self {
            id: id.into(),
            steps,
            total_distance_m,
            total_duration_s,
        }
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Stable identifier of step `index` on this route.
    pub fn step_id(&self, index: usize) -> StepId {
        StepId::new(self.id.clone(), index as u32)
    }

    /// All step geometries joined, without repeating shared joints.
    pub fn full_polyline(&self) -> Vec<GpsPoint> {
        let mut points: Vec<GpsPoint> = Vec::new();
        for step in &self.steps {
            for point in &step.polyline {
                if points.last() != Some(point) {
                    points.push(*point);
                }
            }
        }
        points
    }

    /// Progress of a point along the whole route.
    pub fn progress(&self, point: &GpsPoint) -> Option<RouteProgress> {
        progress(point, &self.full_polyline())
    }
}
