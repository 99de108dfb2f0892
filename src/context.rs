//! # Route Context
//!
//! Static per-step context for the active route: lane, surface and hazard
//! attributes from a priority-ordered list of providers, the turn angle at
//! each step boundary and the step grade.
//!
//! Providers are queried concurrently; their answers are merged in priority
//! order. A provider that fails is left out of the merge for that step.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo_utils::{haversine_distance, heading_change, initial_bearing};
use crate::lru_cache::SharedLruCache;
use crate::route::{Route, RouteStep};
use crate::GpsPoint;

/// Default number of memoized provider lookups.
pub const DEFAULT_LOOKUP_CACHE_CAPACITY: usize = 256;

/// Segments shorter than this carry no usable bearing.
const MIN_BEARING_SEGMENT_M: f64 = 0.5;

/// Coordinates are keyed at ~0.1 m resolution for lookup memoization.
const GEOMETRY_KEY_SCALE: f64 = 1e6;

/// Static attributes of one step as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTags {
    pub has_protected_lane: bool,
    pub has_painted_lane: bool,
    pub surface_rough: bool,
    pub hazard_count: u32,
    /// Road classification (e.g. "cycleway", "residential")
    pub highway_class: Option<String>,
    /// Surface material (e.g. "asphalt", "gravel")
    pub surface: Option<String>,
}

impl StepTags {
    /// Fold in tags from a provider ranked below the ones already merged.
    ///
    /// Flags are OR-ed, hazards take the maximum and string attributes keep
    /// the first value seen.
    pub fn merge_lower_priority(&mut self, other: &StepTags) {
        self.has_protected_lane |= other.has_protected_lane;
        self.has_painted_lane |= other.has_painted_lane;
        self.surface_rough |= other.surface_rough;
        self.hazard_count = self.hazard_count.max(other.hazard_count);
        if self.highway_class.is_none() {
            self.highway_class = other.highway_class.clone();
        }
        if self.surface.is_none() {
            self.surface = other.surface.clone();
        }
    }

    /// Merge tags listed from highest to lowest priority.
    pub fn merge_by_priority<'a, I>(tags: I) -> StepTags
    where
        I: IntoIterator<Item = &'a StepTags>,
    {
        let mut merged = StepTags::default();
        for t in tags {
            merged.merge_lower_priority(t);
        }
        merged
    }

    /// Short display hints, in display order.
    pub fn hints(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if self.has_protected_lane {
            hints.push("Protected lane".to_string());
        } else if self.has_painted_lane {
            hints.push("Painted lane".to_string());
        }
        if self.hazard_count > 0 {
            hints.push(format!("Hazard ×{}", self.hazard_count));
        }
        if self.surface_rough {
            hints.push("Rough surface".to_string());
        }
        hints
    }

    /// True when the tags would change neither score nor instruction.
    pub fn is_neutral(&self) -> bool {
        !self.has_protected_lane
            && !self.has_painted_lane
            && !self.surface_rough
            && self.hazard_count == 0
    }
}

/// Everything the scorer needs to know about a step besides live data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    pub tags: StepTags,
    /// Signed heading change entering the step, in [-π, π]
    pub turn_radians: f64,
    /// Step grade in percent (positive uphill)
    pub grade_percent: f64,
}

/// A step's context plus its display instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualStep {
    pub step_index: u32,
    pub context: StepContext,
    pub instruction: String,
}

/// Elevation summary for a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeSummary {
    pub average_grade_percent: f64,
    pub max_grade_percent: f64,
    /// Total climbing in meters
    pub ascent_m: f64,
    /// Total descending in meters
    pub descent_m: f64,
    /// Grade per step, indexed like the route's steps
    pub step_grades_percent: Vec<f64>,
}

impl GradeSummary {
    /// Grade of step `index`, or 0 when unknown.
    pub fn grade_for_step(&self, index: usize) -> f64 {
        self.step_grades_percent
            .get(index)
            .copied()
            .filter(|g| g.is_finite())
            .unwrap_or(0.0)
    }
}

/// A source of static step attributes (OSM lanes, city hazard feeds, ...).
#[async_trait]
pub trait AttributeProvider: Send + Sync {
    /// Name used in logs and cache keys. Must be unique per builder.
    fn name(&self) -> &str;

    /// Look up the attributes of one step.
    async fn tags(&self, step: &RouteStep) -> Result<StepTags>;
}

/// A source of grade data for a whole route.
#[async_trait]
pub trait ElevationProvider: Send + Sync {
    async fn grade_summary(&self, route: &Route) -> Result<GradeSummary>;
}

type LookupKey = (String, Vec<(i64, i64)>);

/// Builds per-step context from a priority-ordered list of providers.
pub struct RouteContextBuilder {
    providers: Vec<Arc<dyn AttributeProvider>>,
    cache: SharedLruCache<LookupKey, StepTags>,
}

impl RouteContextBuilder {
    /// Create a builder. `providers` are listed from highest to lowest
    /// priority.
    pub fn new(providers: Vec<Arc<dyn AttributeProvider>>) -> Self {
        Self {
            providers,
            cache: SharedLruCache::with_min_capacity(DEFAULT_LOOKUP_CACHE_CAPACITY),
        }
    }

    /// Create a builder with a custom lookup cache size.
    pub fn with_cache_capacity(
        providers: Vec<Arc<dyn AttributeProvider>>,
        capacity: usize,
    ) -> Result<Self> {
        Ok(Self {
            providers,
            cache: SharedLruCache::new(capacity)?,
        })
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Number of memoized provider lookups.
    pub fn cached_lookups(&self) -> usize {
        self.cache.len()
    }

    /// Build the context of every step of `route`, in step order.
    pub async fn context(
        &self,
        route: &Route,
        grades: Option<&GradeSummary>,
    ) -> Vec<ContextualStep> {
        let turns = turn_angles(route);
        let lookups = route.steps.iter().map(|step| self.merged_tags(step));
        let all_tags = join_all(lookups).await;

        all_tags
            .into_iter()
            .zip(route.steps.iter())
            .enumerate()
            .map(|(index, (tags, step))| {
                let instruction = compose_instruction(step.instruction.as_deref(), &tags);
                ContextualStep {
                    step_index: index as u32,
                    context: StepContext {
                        tags,
                        turn_radians: turns.get(index).copied().unwrap_or(0.0),
                        grade_percent: grades.map_or(0.0, |g| g.grade_for_step(index)),
                    },
                    instruction,
                }
            })
            .collect()
    }

    /// Fetch the grade summary first, then build the context. A failing
    /// elevation provider leaves every step flat.
    pub async fn context_with_elevation(
        &self,
        route: &Route,
        elevation: &dyn ElevationProvider,
    ) -> Vec<ContextualStep> {
        let grades = match elevation.grade_summary(route).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("[RouteContext] Elevation lookup failed for {}: {}", route.id, e);
                None
            }
        };
        self.context(route, grades.as_ref()).await
    }

    async fn merged_tags(&self, step: &RouteStep) -> StepTags {
        let geometry = geometry_key(&step.polyline);
        let lookups = self
            .providers
            .iter()
            .map(|provider| self.lookup(provider.as_ref(), step, geometry.clone()));
        let answers = join_all(lookups).await;
        StepTags::merge_by_priority(answers.iter().flatten())
    }

    async fn lookup(
        &self,
        provider: &dyn AttributeProvider,
        step: &RouteStep,
        geometry: Vec<(i64, i64)>,
    ) -> Option<StepTags> {
        let key = (provider.name().to_string(), geometry);
        if let Some(tags) = self.cache.get(&key) {
            return Some(tags);
        }
        match provider.tags(step).await {
            Ok(tags) => {
                self.cache.set(key, tags.clone());
                Some(tags)
            }
            Err(e) => {
                warn!("[RouteContext] Provider {} failed: {}", provider.name(), e);
                None
            }
        }
    }
}

fn geometry_key(points: &[GpsPoint]) -> Vec<(i64, i64)> {
    points
        .iter()
        .map(|p| {
            (
                (p.latitude * GEOMETRY_KEY_SCALE).round() as i64,
                (p.longitude * GEOMETRY_KEY_SCALE).round() as i64,
            )
        })
        .collect()
}

/// Display instruction for a step: the base maneuver followed by hints.
pub fn compose_instruction(base: Option<&str>, tags: &StepTags) -> String {
    let hints = tags.hints().join(", ");
    let base = base.map(str::trim).filter(|b| !b.is_empty());
    match (base, hints.is_empty()) {
        (Some(base), false) => format!("{} – {}", base, hints),
        (Some(base), true) => base.to_string(),
        (None, false) => hints,
        (None, true) => String::new(),
    }
}

/// Heading change entering each step; the first step is 0.
pub fn turn_angles(route: &Route) -> Vec<f64> {
    let mut angles = Vec::with_capacity(route.steps.len());
    for (index, step) in route.steps.iter().enumerate() {
        let angle = if index == 0 {
            0.0
        } else {
            let previous = &route.steps[index - 1];
            match (final_bearing(&previous.polyline), first_bearing(&step.polyline)) {
                (Some(from), Some(to)) => heading_change(from, to),
                _ => {
                    debug!("[RouteContext] No usable bearing at step {}", index);
                    0.0
                }
            }
        };
        angles.push(angle);
    }
    angles
}

fn first_bearing(points: &[GpsPoint]) -> Option<f64> {
    points
        .windows(2)
        .find(|w| haversine_distance(&w[0], &w[1]) >= MIN_BEARING_SEGMENT_M)
        .map(|w| initial_bearing(&w[0], &w[1]))
}

fn final_bearing(points: &[GpsPoint]) -> Option<f64> {
    points
        .windows(2)
        .rev()
        .find(|w| haversine_distance(&w[0], &w[1]) >= MIN_BEARING_SEGMENT_M)
        .map(|w| initial_bearing(&w[0], &w[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComfortError;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        name: &'static str,
        tags: StepTags,
        calls: AtomicUsize,
    }

    impl FixedProvider {
        fn new(name: &'static str, tags: StepTags) -> Arc<Self> {
            Arc::new(Self {
                name,
                tags,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AttributeProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn tags(&self, _step: &RouteStep) -> Result<StepTags> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tags.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl AttributeProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn tags(&self, _step: &RouteStep) -> Result<StepTags> {
            Err(ComfortError::provider("failing", "service unavailable"))
        }
    }

    struct FixedElevation(GradeSummary);

    #[async_trait]
    impl ElevationProvider for FixedElevation {
        async fn grade_summary(&self, _route: &Route) -> Result<GradeSummary> {
            Ok(self.0.clone())
        }
    }

    fn provider_a() -> StepTags {
        StepTags {
            has_painted_lane: true,
            hazard_count: 1,
            surface: Some("asphalt".to_string()),
            ..StepTags::default()
        }
    }

    fn provider_b() -> StepTags {
        StepTags {
            has_protected_lane: true,
            hazard_count: 3,
            surface: Some("concrete".to_string()),
            highway_class: Some("cycleway".to_string()),
            ..StepTags::default()
        }
    }

    /// North, then east: a right turn at the joint.
    fn l_shaped_route() -> Route {
        let north = vec![GpsPoint::new(51.500, -0.120), GpsPoint::new(51.502, -0.120)];
        let east = vec![GpsPoint::new(51.502, -0.120), GpsPoint::new(51.502, -0.117)];
        Route::new(
            "route-ctx",
            vec![
                RouteStep::new(north, Some("Head north".to_string())),
                RouteStep::new(east, Some("Turn right".to_string())),
            ],
        )
    }

    #[test]
    fn test_merge_by_priority() {
        let merged = StepTags::merge_by_priority([&provider_a(), &provider_b()]);
        assert!(merged.has_protected_lane);
        assert!(merged.has_painted_lane);
        assert_eq!(merged.hazard_count, 3);
        assert_eq!(merged.surface.as_deref(), Some("asphalt"));
        // Only B knows the class, so it fills the gap
        assert_eq!(merged.highway_class.as_deref(), Some("cycleway"));
    }

    #[test]
    fn test_compose_instruction() {
        let tags = StepTags {
            has_protected_lane: true,
            hazard_count: 2,
            ..StepTags::default()
        };
        assert_eq!(
            compose_instruction(Some("Turn right"), &tags),
            "Turn right – Protected lane, Hazard ×2"
        );

        let tags = StepTags {
            has_painted_lane: true,
            hazard_count: 1,
            ..StepTags::default()
        };
        assert_eq!(compose_instruction(None, &tags), "Painted lane, Hazard ×1");
        assert_eq!(compose_instruction(Some("  "), &tags), "Painted lane, Hazard ×1");

        let neutral = StepTags::default();
        assert!(neutral.is_neutral());
        assert_eq!(compose_instruction(Some("Turn left"), &neutral), "Turn left");
        assert_eq!(compose_instruction(None, &neutral), "");
    }

    #[test]
    fn test_rough_surface_hint() {
        let tags = StepTags {
            surface_rough: true,
            ..StepTags::default()
        };
        assert_eq!(compose_instruction(Some("Continue"), &tags), "Continue – Rough surface");
    }

    #[test]
    fn test_turn_angles() {
        let angles = turn_angles(&l_shaped_route());
        assert_eq!(angles.len(), 2);
        assert_eq!(angles[0], 0.0);
        assert!((angles[1] - FRAC_PI_2).abs() < 0.01);
    }

    #[test]
    fn test_turn_angles_skip_degenerate_segments() {
        let mut route = l_shaped_route();
        // Duplicate the joint so both boundary segments start with zero length
        route.steps[0].polyline.push(GpsPoint::new(51.502, -0.120));
        route.steps[1].polyline.insert(0, GpsPoint::new(51.502, -0.120));
        let angles = turn_angles(&route);
        assert!((angles[1] - FRAC_PI_2).abs() < 0.01);
    }

    #[test]
    fn test_grade_for_step() {
        let summary = GradeSummary {
            step_grades_percent: vec![2.0, f64::NAN],
            ..GradeSummary::default()
        };
        assert_eq!(summary.grade_for_step(0), 2.0);
        assert_eq!(summary.grade_for_step(1), 0.0);
        assert_eq!(summary.grade_for_step(7), 0.0);
    }

    #[tokio::test]
    async fn test_context_merges_providers_in_priority_order() {
        let a = FixedProvider::new("a", provider_a());
        let b = FixedProvider::new("b", provider_b());
        let builder = RouteContextBuilder::new(vec![
            a as Arc<dyn AttributeProvider>,
            b as Arc<dyn AttributeProvider>,
        ]);

        let grades = GradeSummary {
            step_grades_percent: vec![1.5, -3.0],
            ..GradeSummary::default()
        };
        let steps = builder.context(&l_shaped_route(), Some(&grades)).await;

        assert_eq!(steps.len(), 2);
        let second = &steps[1];
        assert_eq!(second.step_index, 1);
        assert_eq!(second.context.tags.surface.as_deref(), Some("asphalt"));
        assert_eq!(second.context.tags.hazard_count, 3);
        assert_eq!(second.context.grade_percent, -3.0);
        assert!(second.context.turn_radians > 1.5);
        assert_eq!(second.instruction, "Turn right – Protected lane, Hazard ×3");
    }

    #[tokio::test]
    async fn test_failing_provider_is_omitted() {
        let a = FixedProvider::new("a", provider_a());
        let builder = RouteContextBuilder::new(vec![
            Arc::new(FailingProvider) as Arc<dyn AttributeProvider>,
            a as Arc<dyn AttributeProvider>,
        ]);
        let steps = builder.context(&l_shaped_route(), None).await;
        assert_eq!(steps[0].context.tags, provider_a());
        assert_eq!(steps[0].context.grade_percent, 0.0);
    }

    #[tokio::test]
    async fn test_no_providers_gives_neutral_context() {
        let builder = RouteContextBuilder::new(Vec::new());
        let steps = builder.context(&l_shaped_route(), None).await;
        assert!(steps.iter().all(|s| s.context.tags.is_neutral()));
        assert_eq!(steps[0].instruction, "Head north");
    }

    #[tokio::test]
    async fn test_lookups_are_memoized() {
        let a = FixedProvider::new("a", provider_a());
        let builder = RouteContextBuilder::new(vec![a.clone() as Arc<dyn AttributeProvider>]);
        let route = l_shaped_route();

        builder.context(&route, None).await;
        builder.context(&route, None).await;

        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
        assert_eq!(builder.cached_lookups(), 2);
    }

    #[tokio::test]
    async fn test_context_with_elevation() {
        let builder = RouteContextBuilder::new(Vec::new());
        let elevation = FixedElevation(GradeSummary {
            step_grades_percent: vec![4.0, 6.0],
            ..GradeSummary::default()
        });
        let steps = builder
            .context_with_elevation(&l_shaped_route(), &elevation)
            .await;
        assert_eq!(steps[1].context.grade_percent, 6.0);
    }

    #[test]
    fn test_zero_cache_capacity_rejected() {
        assert!(RouteContextBuilder::with_cache_capacity(Vec::new(), 0).is_err());
    }
}
