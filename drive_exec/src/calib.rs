//! # Calibration Module
//!
//! Conversion between the raw drive strength commanded to the motors and the linear speed of the
//! vehicle.
//!
//! The model is built from three measured calibration points (`low`, `mid`, `high`) and a dead
//! zone:
//!
//! ```text
//! speed
//!   ^                                   . (extrapolated to 255)
//!   |                           high  .
//!   |                          x----
//!   |                  mid  ---
//!   |                  x----
//!   |          low ----
//!   |          x
//!   |        /
//!   +-------+--+-------------+--------------+----> drive strength
//!        deadzone low       mid           high
//! ```
//!
//! - Below the dead zone the motors don't turn and the speed is zero.
//! - From the dead zone to `low` the speed rises linearly from zero.
//! - From `low` to `mid` the speed follows the low slope.
//! - Above `mid` the speed follows the high slope, with no limit at `high` or at 255. Speeds
//!   above the `high` point are extrapolated past the measured data and are for display only.
//!
//! [`CalibrationConverter::inverse`] undoes [`CalibrationConverter::forward`] within each segment.
//! Neither function clamps; restricting the drive strength to `[0, 255]` is the caller's job.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use util::maths::{clamp, lerp};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum drive strength that can be commanded.
pub const MAX_DRIVE_STRENGTH: u8 = 255;

/// Speeds at or below this are treated as stationary when planning a distance.
///
/// Units: meters/second
pub const MIN_PLANNING_SPEED_MS: f64 = 0.001;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A measured (drive strength, speed) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Drive strength, between 0 and 255.
    pub drive_strength: u8,

    /// Speed measured at this drive strength.
    ///
    /// Units: meters/second
    pub speed_ms: f64,
}

/// Calibration parameters, the `[calib]` table of `drive_exec.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibParams {
    pub low: CalibrationPoint,
    pub mid: CalibrationPoint,
    pub high: CalibrationPoint,

    /// Drive strength below which the motors don't turn.
    pub deadzone: u8,
}

/// Converts between drive strength and speed.
///
/// The converter holds no mutable state and may be shared between any number of threads.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationConverter {
    params: CalibParams,

    /// Slope between the `low` and `mid` points.
    ///
    /// Units: (meters/second)/drive strength
    slope_low: f64,

    /// Slope between the `mid` and `high` points.
    ///
    /// Units: (meters/second)/drive strength
    slope_high: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CalibError {
    #[error(
        "Calibration drive strengths must be strictly increasing, found low = {0}, mid = {1}, \
         high = {2}"
    )]
    DriveStrengthNotIncreasing(u8, u8, u8),

    #[error(
        "Calibration speeds must be finite, non-negative and strictly increasing, found \
         low = {0}, mid = {1}, high = {2}"
    )]
    SpeedNotIncreasing(f64, f64, f64),

    #[error("The dead zone ({0}) must be below the low calibration point ({1})")]
    DeadzoneTooHigh(u8, u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for CalibParams {
    fn default() -> Self {
        Self {
            low: CalibrationPoint { drive_strength: 100, speed_ms: 0.28 },
            mid: CalibrationPoint { drive_strength: 150, speed_ms: 0.40 },
            high: CalibrationPoint { drive_strength: 200, speed_ms: 0.50 },
            deadzone: 90,
        }
    }
}

impl CalibrationConverter {
    /// Build a converter from the calibration parameters.
    ///
    /// The points must be strictly increasing in both drive strength and speed, and the dead zone
    /// must lie below the `low` point.
    pub fn new(params: CalibParams) -> Result<Self, CalibError> {
        let (low, mid, high) = (params.low, params.mid, params.high);

        if !(low.drive_strength < mid.drive_strength && mid.drive_strength < high.drive_strength) {
            return Err(CalibError::DriveStrengthNotIncreasing(
                low.drive_strength,
                mid.drive_strength,
                high.drive_strength,
            ));
        }

        let speeds_valid = [low.speed_ms, mid.speed_ms, high.speed_ms]
            .iter()
            .all(|s| s.is_finite() && *s >= 0.0)
            && low.speed_ms < mid.speed_ms
            && mid.speed_ms < high.speed_ms;
        if !speeds_valid {
            return Err(CalibError::SpeedNotIncreasing(
                low.speed_ms,
                mid.speed_ms,
                high.speed_ms,
            ));
        }

        if params.deadzone >= low.drive_strength {
            return Err(CalibError::DeadzoneTooHigh(params.deadzone, low.drive_strength));
        }

        Ok(Self {
            params,
            slope_low: slope(&low, &mid),
            slope_high: slope(&mid, &high),
        })
    }

    /// The parameters this converter was built from.
    pub fn params(&self) -> &CalibParams {
        &self.params
    }

    /// The `(low, high)` slope pair.
    pub fn slopes(&self) -> (f64, f64) {
        (self.slope_low, self.slope_high)
    }

    /// Convert a drive strength into a speed in meters/second.
    ///
    /// The calibration points themselves, and the dead zone (which maps to zero), are reproduced
    /// exactly.
    pub fn forward(&self, drive_strength: f64) -> f64 {
        let CalibParams { low, mid, high, deadzone } = self.params;
        let deadzone = deadzone as f64;

        if drive_strength < deadzone {
            0.0
        }
        else if drive_strength <= low.drive_strength as f64 {
            let t = (drive_strength - deadzone) / (low.drive_strength as f64 - deadzone);
            lerp(0.0, low.speed_ms, t).max(0.0)
        }
        else if drive_strength <= mid.drive_strength as f64 {
            lerp(low.speed_ms, mid.speed_ms, segment_position(&low, &mid, drive_strength))
        }
        else {
            lerp(mid.speed_ms, high.speed_ms, segment_position(&mid, &high, drive_strength))
        }
    }

    /// Convert a speed in meters/second into a drive strength.
    ///
    /// Speeds at or below zero give a drive strength of zero. The result is not rounded or
    /// clamped, see [`CalibrationConverter::drive_strength_for_speed`].
    pub fn inverse(&self, speed_ms: f64) -> f64 {
        let CalibParams { low, mid, deadzone, .. } = self.params;
        let deadzone = deadzone as f64;

        if speed_ms <= 0.0 {
            0.0
        }
        else if speed_ms <= low.speed_ms {
            deadzone + (speed_ms / low.speed_ms) * (low.drive_strength as f64 - deadzone)
        }
        else if speed_ms <= mid.speed_ms {
            low.drive_strength as f64 + (speed_ms - low.speed_ms) / self.slope_low
        }
        else {
            mid.drive_strength as f64 + (speed_ms - mid.speed_ms) / self.slope_high
        }
    }

    /// Speed at full drive strength.
    ///
    /// This is extrapolated beyond the `high` calibration point, so it is only an estimate for
    /// display and planning, not a safety limit.
    pub fn max_speed_estimate(&self) -> f64 {
        self.forward(MAX_DRIVE_STRENGTH as f64)
    }

    /// The drive strength to command for the given speed, rounded to the nearest integer and
    /// clamped to `[0, 255]`.
    pub fn drive_strength_for_speed(&self, speed_ms: f64) -> u8 {
        let ds = self.inverse(speed_ms).round();

        // NaN casts to zero
        clamp(ds, 0.0, MAX_DRIVE_STRENGTH as f64) as u8
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Time needed to drive the given distance at the given speed.
///
/// Returns `None` if the speed is too low to plan with, or if the distance is negative or not
/// finite.
pub fn duration_for_distance(distance_m: f64, speed_ms: f64) -> Option<f64> {
    if !(speed_ms > MIN_PLANNING_SPEED_MS) || !distance_m.is_finite() || distance_m < 0.0 {
        return None
    }

    Some(distance_m / speed_ms)
}

/// Distance covered by driving at the given speed for the given time.
pub fn distance_for_duration(duration_s: f64, speed_ms: f64) -> f64 {
    speed_ms * duration_s
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn slope(from: &CalibrationPoint, to: &CalibrationPoint) -> f64 {
    (to.speed_ms - from.speed_ms) / (to.drive_strength as f64 - from.drive_strength as f64)
}

/// Position of the drive strength along the segment, 0 at `from` and 1 at `to`.
fn segment_position(from: &CalibrationPoint, to: &CalibrationPoint, drive_strength: f64) -> f64 {
    (drive_strength - from.drive_strength as f64)
        / (to.drive_strength as f64 - from.drive_strength as f64)
}

#[cfg(test)]
mod test {
    use super::*;

    const TOL: f64 = 1e-9;

    fn converter() -> CalibrationConverter {
        CalibrationConverter::new(CalibParams::default()).unwrap()
    }

    #[test]
    fn test_forward_reference_points() {
        let c = converter();

        assert_eq!(c.forward(0.0), 0.0);
        assert_eq!(c.forward(89.0), 0.0);
        assert_eq!(c.forward(90.0), 0.0);
        assert_eq!(c.forward(100.0), 0.28);
        assert_eq!(c.forward(150.0), 0.40);
        assert_eq!(c.forward(200.0), 0.50);

        assert!((c.forward(95.0) - 0.14).abs() < TOL);
        assert!((c.forward(125.0) - 0.34).abs() < TOL);
        assert!((c.forward(225.0) - 0.55).abs() < TOL);
    }

    #[test]
    fn test_max_speed_estimate() {
        let c = converter();

        // 0.40 + 105 * 0.002
        assert!((c.max_speed_estimate() - 0.61).abs() < TOL);
    }

    #[test]
    fn test_forward_non_decreasing() {
        let c = converter();

        let mut prev = c.forward(0.0);
        for i in 1..=(4 * 255) {
            let speed = c.forward(i as f64 / 4.0);
            assert!(speed >= prev, "forward({}) = {} < {}", i as f64 / 4.0, speed, prev);
            prev = speed;
        }
    }

    #[test]
    fn test_inverse() {
        let c = converter();

        assert_eq!(c.inverse(0.0), 0.0);
        assert_eq!(c.inverse(-0.2), 0.0);
        assert!((c.inverse(0.14) - 95.0).abs() < TOL);
        assert!((c.inverse(0.34) - 125.0).abs() < TOL);
        assert!((c.inverse(0.55) - 225.0).abs() < TOL);

        // Segment ends
        assert!((c.inverse(0.28) - 100.0).abs() < TOL);
        assert!((c.inverse(0.40) - 150.0).abs() < TOL);
    }

    #[test]
    fn test_round_trip_inside_segments() {
        let c = converter();

        let inside = [91.5, 95.0, 99.9, 100.5, 125.0, 149.0, 150.5, 180.0, 225.0, 255.0];
        for x in inside.iter() {
            let y = c.inverse(c.forward(*x));
            assert!((y - x).abs() < TOL, "inverse(forward({})) = {}", x, y);
        }
    }

    #[test]
    fn test_drive_strength_for_speed() {
        let c = converter();

        assert_eq!(c.drive_strength_for_speed(0.34), 125);
        assert_eq!(c.drive_strength_for_speed(0.0), 0);
        assert_eq!(c.drive_strength_for_speed(0.001), 90);

        // Far beyond the maximum estimate
        assert_eq!(c.drive_strength_for_speed(2.0), 255);
        assert_eq!(c.drive_strength_for_speed(f64::NAN), 0);
    }

    #[test]
    fn test_invalid_params() {
        let mut p = CalibParams::default();
        p.mid.drive_strength = 100;
        assert_eq!(
            CalibrationConverter::new(p).unwrap_err(),
            CalibError::DriveStrengthNotIncreasing(100, 100, 200)
        );

        let mut p = CalibParams::default();
        p.high.speed_ms = 0.3;
        assert!(matches!(
            CalibrationConverter::new(p),
            Err(CalibError::SpeedNotIncreasing(..))
        ));

        let mut p = CalibParams::default();
        p.deadzone = 100;
        assert_eq!(
            CalibrationConverter::new(p).unwrap_err(),
            CalibError::DeadzoneTooHigh(100, 100)
        );
    }

    #[test]
    fn test_planning() {
        assert_eq!(duration_for_distance(0.5, 0.25), Some(2.0));
        assert_eq!(duration_for_distance(0.5, 0.001), None);
        assert_eq!(duration_for_distance(0.5, 0.0), None);
        assert_eq!(duration_for_distance(-0.5, 0.25), None);
        assert_eq!(duration_for_distance(0.5, f64::NAN), None);

        assert!((distance_for_duration(2.0, 0.34) - 0.68).abs() < TOL);
    }

    #[test]
    fn test_params_from_toml() {
        let p: CalibParams = util::params::load_from_str(
            r#"
            deadzone = 80

            [low]
            drive_strength = 90
            speed_ms = 0.2

            [mid]
            drive_strength = 140
            speed_ms = 0.35

            [high]
            drive_strength = 210
            speed_ms = 0.52
            "#,
        )
        .unwrap();

        let c = CalibrationConverter::new(p).unwrap();
        assert_eq!(c.forward(140.0), 0.35);
        assert!((c.slopes().0 - 0.003).abs() < TOL);
    }
}
