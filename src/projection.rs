//! Geometry projector: nearest-point projection of GPS samples onto polylines.
//!
//! All projection math happens in a locally flat metric frame centered on the
//! query point (see [`LocalFrame`]). Candidates are compared by Euclidean
//! distance in that frame; ties go to the lowest segment index.

use serde::{Deserialize, Serialize};

use crate::error::{ComfortError, Result};
use crate::geo_utils::{haversine_distance, LocalFrame};
use crate::GpsPoint;

/// Default vertex cap before uniform subsampling kicks in.
pub const DEFAULT_VERTEX_CAP: usize = 5_000;

/// Segments shorter than this (squared meters) are treated as points.
const DEGENERATE_SEGMENT_M2: f64 = 1e-12;

/// Configuration for the geometry projector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorConfig {
    /// Maximum number of polyline vertices examined per query.
    /// Longer polylines are uniformly subsampled, keeping both endpoints.
    /// Default: 5,000
    pub vertex_cap: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            vertex_cap: DEFAULT_VERTEX_CAP,
        }
    }
}

impl ProjectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vertex_cap < 2 {
            return Err(ComfortError::invalid_config(
                "vertex_cap",
                "a polyline needs at least 2 vertices",
            ));
        }
        Ok(())
    }
}

/// Result of projecting a point onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// The snapped point on the polyline
    pub point: GpsPoint,
    /// Index of the leading vertex of the owning segment (in the caller's polyline)
    pub segment_index: usize,
    /// Parametric offset along the owning segment, in [0, 1]
    pub t: f64,
    /// Perpendicular distance from the query point in meters
    pub distance_m: f64,
}

/// How far along a polyline a projected point lies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteProgress {
    pub projection: Projection,
    /// Traversed fraction of the polyline, in [0, 1]
    pub fraction: f64,
    /// Distance covered up to the projection in meters
    pub traversed_m: f64,
    /// Distance left to the end of the polyline in meters
    pub remaining_m: f64,
    /// Total polyline length in meters
    pub total_m: f64,
}

/// Project `point` onto `polyline` using the default vertex cap.
///
/// Returns `None` if the polyline has fewer than two vertices.
pub fn nearest_point(point: &GpsPoint, polyline: &[GpsPoint]) -> Option<Projection> {
    nearest_point_capped(point, polyline, DEFAULT_VERTEX_CAP)
}

/// Project `point` onto `polyline`, examining at most `vertex_cap` vertices.
pub fn nearest_point_capped(
    point: &GpsPoint,
    polyline: &[GpsPoint],
    vertex_cap: usize,
) -> Option<Projection> {
    if polyline.len() < 2 {
        return None;
    }
    let indices = sample_indices(polyline.len(), vertex_cap);
    nearest_in(point, polyline, &indices).map(|(_, projection)| projection)
}

/// Snap a point onto the polyline.
pub fn snap(point: &GpsPoint, polyline: &[GpsPoint]) -> Option<GpsPoint> {
    nearest_point(point, polyline).map(|p| p.point)
}

/// Progress of `point` along `polyline` using the default vertex cap.
pub fn progress(point: &GpsPoint, polyline: &[GpsPoint]) -> Option<RouteProgress> {
    progress_capped(point, polyline, DEFAULT_VERTEX_CAP)
}

/// Progress of `point` along `polyline`, examining at most `vertex_cap` vertices.
///
/// Traversed distance is the sum of the full segments before the owning
/// segment plus the partial distance `t × length` into it.
pub fn progress_capped(
    point: &GpsPoint,
    polyline: &[GpsPoint],
    vertex_cap: usize,
) -> Option<RouteProgress> {
    if polyline.len() < 2 {
        return None;
    }
    let indices = sample_indices(polyline.len(), vertex_cap);
    let (position, projection) = nearest_in(point, polyline, &indices)?;

    let mut total = 0.0;
    let mut traversed = 0.0;
    for (i, pair) in indices.windows(2).enumerate() {
        let length = haversine_distance(&polyline[pair[0]], &polyline[pair[1]]);
        if i < position {
            traversed += length;
        } else if i == position {
            traversed += projection.t * length;
        }
        total += length;
    }

    let fraction = if total > 0.0 {
        (traversed / total).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(RouteProgress {
        projection,
        fraction,
        traversed_m: traversed,
        remaining_m: (total - traversed).max(0.0),
        total_m: total,
    })
}

/// Vertex indices to examine for a polyline of `len` vertices.
///
/// Below the cap every vertex is kept. Above it, `cap` indices are spread
/// uniformly; the first and last vertex are always included.
pub fn sample_indices(len: usize, vertex_cap: usize) -> Vec<usize> {
    let cap = vertex_cap.max(2);
    if len <= cap {
        return (0..len).collect();
    }
    (0..cap).map(|i| i * (len - 1) / (cap - 1)).collect()
}

/// Find the best candidate over the sampled segments.
/// Returns the position of the owning segment within `indices` alongside the projection.
fn nearest_in(
    point: &GpsPoint,
    polyline: &[GpsPoint],
    indices: &[usize],
) -> Option<(usize, Projection)> {
    let frame = LocalFrame::centered_on(*point);
    let mut best: Option<(usize, Projection)> = None;

    for (position, pair) in indices.windows(2).enumerate() {
        let (t, x, y) = project_origin_onto_segment(&frame, &polyline[pair[0]], &polyline[pair[1]]);
        let distance = x.hypot(y);
        if !distance.is_finite() {
            continue;
        }
        // Strict comparison keeps the lowest segment index on ties
        if best.map_or(true, |(_, b)| distance < b.distance_m) {
            best = Some((
                position,
                Projection {
                    point: frame.to_point(x, y),
                    segment_index: pair[0],
                    t,
                    distance_m: distance,
                },
            ));
        }
    }

    best
}

/// Project the frame origin onto segment AB. Returns (t, x, y) of the closest point.
fn project_origin_onto_segment(frame: &LocalFrame, a: &GpsPoint, b: &GpsPoint) -> (f64, f64, f64) {
    let (ax, ay) = frame.to_xy(a);
    let (bx, by) = frame.to_xy(b);
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    if len_sq < DEGENERATE_SEGMENT_M2 {
        return (0.0, ax, ay);
    }

    let t = (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0);
    (t, ax + t * dx, ay + t * dy)
}
