//! Comfort scoring.
//!
//! A pure, deterministic function of measured roughness, slope and a step's
//! static attributes:
//!
//! ```text
//! base  = w_r·(1 − roughness) + w_s·(1 − slope)        (weights from RideMode)
//! score = min(1, base · lanes_factor · turn_factor · hazard_factor)
//! ```
//!
//! | Factor          | Formula                                      |
//! |-----------------|----------------------------------------------|
//! | `lanes_factor`  | `1 + 0.10 × lane_bonus` (1.0 / 0.5 / 0.0)    |
//! | `turn_factor`   | `1 − 0.35 × clamp(|θ| / π)`                  |
//! | `hazard_factor` | `1 − 0.40 × min(1, 0.25 × hazards)`          |

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::context::{ContextualStep, StepContext};
use crate::error::{ensure_positive, ensure_unit_interval, ComfortError, Result};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Maximum boost from a bike lane (protected lane = full bonus).
pub const LANE_WEIGHT: f64 = 0.10;
/// Maximum reduction for a full reversal.
pub const TURN_WEIGHT: f64 = 0.35;
/// Maximum reduction for a hazard-saturated step.
pub const HAZARD_WEIGHT: f64 = 0.40;
/// Penalty contributed by each hazard before saturation.
pub const HAZARD_STEP: f64 = 0.25;

/// Named weighting preset for the base score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideMode {
    /// Prioritise smooth surfaces above everything else
    Smoothness,
    /// Relaxed riding, avoids climbs as much as rough patches
    Chill,
    /// Tolerates mild roughness, cares mostly about grade
    Fast,
    /// Balanced weighting for low-visibility riding
    NightSafe,
}

/// Relative weights of roughness and slope in the base score (sum to 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeWeights {
    pub roughness: f64,
    pub slope: f64,
}

impl RideMode {
    pub const ALL: [RideMode; 4] = [
        RideMode::Smoothness,
        RideMode::Chill,
        RideMode::Fast,
        RideMode::NightSafe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RideMode::Smoothness => "smoothness",
            RideMode::Chill => "chill",
            RideMode::Fast => "fast",
            RideMode::NightSafe => "night_safe",
        }
    }

    pub fn weights(&self) -> ModeWeights {
        match self {
            RideMode::Smoothness => ModeWeights {
                roughness: 0.75,
                slope: 0.25,
            },
            RideMode::Chill => ModeWeights {
                roughness: 0.5,
                slope: 0.5,
            },
            RideMode::Fast => ModeWeights {
                roughness: 0.35,
                slope: 0.65,
            },
            RideMode::NightSafe => ModeWeights {
                roughness: 0.6,
                slope: 0.4,
            },
        }
    }
}

impl std::fmt::Display for RideMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RideMode {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "smoothness" | "smooth" => Ok(RideMode::Smoothness),
            "chill" => Ok(RideMode::Chill),
            "fast" => Ok(RideMode::Fast),
            "night_safe" | "nightsafe" | "night" => Ok(RideMode::NightSafe),
            _ => Err(()),
        }
    }
}

impl Default for RideMode {
    fn default() -> Self {
        RideMode::Smoothness
    }
}

/// Normalization constants for the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Roughness RMS (m/s²) treated as maximally rough. Default: 3.0
    pub roughness_ceiling_rms: f64,

    /// Uphill grade (%) treated as the maximum slope penalty. Default: 10.0
    pub max_grade_percent: f64,

    /// Share of a downhill grade counted as penalty. Default: 0.5
    pub downhill_factor: f64,

    /// Assumed RMS for steps without measurements on normal surfaces. Default: 0.6
    pub smooth_surface_rms: f64,

    /// Assumed RMS for steps without measurements flagged rough. Default: 1.8
    pub rough_surface_rms: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            roughness_ceiling_rms: 3.0,
            max_grade_percent: 10.0,
            downhill_factor: 0.5,
            smooth_surface_rms: 0.6,
            rough_surface_rms: 1.8,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("roughness_ceiling_rms", self.roughness_ceiling_rms)?;
        ensure_positive("max_grade_percent", self.max_grade_percent)?;
        ensure_unit_interval("downhill_factor", self.downhill_factor)?;
        if !(self.smooth_surface_rms >= 0.0 && self.smooth_surface_rms.is_finite()) {
            return Err(ComfortError::invalid_config(
                "smooth_surface_rms",
                "expected a non-negative value",
            ));
        }
        if !(self.rough_surface_rms >= 0.0 && self.rough_surface_rms.is_finite()) {
            return Err(ComfortError::invalid_config(
                "rough_surface_rms",
                "expected a non-negative value",
            ));
        }
        Ok(())
    }
}

/// Every intermediate value of a scoring call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub lane_bonus: f64,
    pub lanes_factor: f64,
    pub turn_penalty: f64,
    pub turn_factor: f64,
    pub hazard_penalty: f64,
    pub hazard_factor: f64,
    pub score: f64,
}

/// Stateless scorer bound to a set of normalization constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one step from measured roughness and a [0, 1] slope penalty.
    ///
    /// A NaN roughness is no measurement: the step's surface prior is used
    /// instead. Infinite roughness saturates.
    pub fn step_score(
        &self,
        roughness_rms: f64,
        slope_penalty: f64,
        mode: RideMode,
        context: &StepContext,
    ) -> (f64, ScoreBreakdown) {
        let roughness_rms = if roughness_rms.is_nan() {
            self.baseline_roughness(context)
        } else {
            roughness_rms
        };
        let roughness = normalized_roughness(roughness_rms, self.config.roughness_ceiling_rms);
        let base = base_score(roughness, unit(slope_penalty), mode);

        let lane_bonus = lane_bonus(context);
        let lanes_factor = 1.0 + LANE_WEIGHT * lane_bonus;
        let turn_penalty = turn_penalty(context.turn_radians);
        let turn_factor = 1.0 - TURN_WEIGHT * turn_penalty;
        let hazard_penalty = hazard_penalty(context.tags.hazard_count);
        let hazard_factor = 1.0 - HAZARD_WEIGHT * hazard_penalty;

        let score = (base * lanes_factor * turn_factor * hazard_factor).clamp(0.0, 1.0);

        (
            score,
            ScoreBreakdown {
                base,
                lane_bonus,
                lanes_factor,
                turn_penalty,
                turn_factor,
                hazard_penalty,
                hazard_factor,
                score,
            },
        )
    }

    /// Slope penalty for a grade in percent.
    pub fn slope_penalty(&self, grade_percent: f64) -> f64 {
        if !grade_percent.is_finite() {
            return 0.0;
        }
        let effective = if grade_percent >= 0.0 {
            grade_percent
        } else {
            -grade_percent * self.config.downhill_factor
        };
        (effective / self.config.max_grade_percent).clamp(0.0, 1.0)
    }

    /// Roughness assumed for a step before anything was measured on it.
    pub fn baseline_roughness(&self, context: &StepContext) -> f64 {
        if context.tags.surface_rough {
            self.config.rough_surface_rms
        } else {
            self.config.smooth_surface_rms
        }
    }

    /// Baseline score from static attributes and grade only.
    pub fn baseline(&self, mode: RideMode, context: &StepContext) -> ScoreBreakdown {
        let roughness = self.baseline_roughness(context);
        let slope = self.slope_penalty(context.grade_percent);
        self.step_score(roughness, slope, mode, context).1
    }

    /// Baseline breakdowns for every step of a route, in step order.
    pub fn score_steps(&self, mode: RideMode, steps: &[ContextualStep]) -> Vec<ScoreBreakdown> {
        #[cfg(feature = "parallel")]
        {
            steps
                .par_iter()
                .map(|step| self.baseline(mode, &step.context))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            steps
                .iter()
                .map(|step| self.baseline(mode, &step.context))
                .collect()
        }
    }
}

/// Score a step with the default normalization constants.
pub fn step_score(
    roughness_rms: f64,
    slope_penalty: f64,
    mode: RideMode,
    context: &StepContext,
) -> (f64, ScoreBreakdown) {
    Scorer::default().step_score(roughness_rms, slope_penalty, mode, context)
}

/// Slope penalty for a grade in percent with the default constants.
pub fn slope_penalty(grade_percent: f64) -> f64 {
    Scorer::default().slope_penalty(grade_percent)
}

/// Mode-weighted combination of the normalized roughness and slope penalty.
pub fn base_score(normalized_roughness: f64, normalized_slope: f64, mode: RideMode) -> f64 {
    let weights = mode.weights();
    weights.roughness * (1.0 - unit(normalized_roughness))
        + weights.slope * (1.0 - unit(normalized_slope))
}

/// 1.0 for a protected lane, 0.5 for a painted lane, 0.0 otherwise.
pub fn lane_bonus(context: &StepContext) -> f64 {
    if context.tags.has_protected_lane {
        1.0
    } else if context.tags.has_painted_lane {
        0.5
    } else {
        0.0
    }
}

/// `|θ| / π` clamped to [0, 1]: 0 going straight, 1 for a full reversal.
pub fn turn_penalty(turn_radians: f64) -> f64 {
    unit(turn_radians.abs() / PI)
}

/// `min(1, hazards × 0.25)`.
pub fn hazard_penalty(hazard_count: u32) -> f64 {
    (hazard_count as f64 * HAZARD_STEP).min(1.0)
}

/// Roughness RMS mapped onto [0, 1].
pub fn normalized_roughness(roughness_rms: f64, ceiling: f64) -> f64 {
    unit(roughness_rms / ceiling)
}

/// Clamp into [0, 1]. Infinities saturate; NaN maps to 0.
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
