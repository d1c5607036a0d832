//! # Mission Parameter Validation
//!
//! The operator thinks in drone speed and ball spacing; the drone wants a drop
//! interval. This module converts one into the other and enforces the ranges
//! the console accepts.
//!
//! ## Usage
//! ```rust
//! use dronelink_core::validation::MissionParams;
//!
//! let params = MissionParams::from_operator_input(10.0, 30.0, 10.0, 200).unwrap();
//! assert_eq!(params.interval_s, 3.0);
//!
//! assert!(MissionParams::from_operator_input(0.0, 30.0, 10.0, 200).is_err());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Ranges
// =============================================================================

pub const VELOCITY_RANGE: (f64, f64) = (0.1, 100.0);
pub const SPACING_RANGE: (f64, f64) = (0.1, 1000.0);
pub const DELAY_RANGE: (f64, f64) = (0.0, 120.0);
pub const STEP_HZ_RANGE: (u32, u32) = (1, 50_000);

// =============================================================================
// Mission Parameters
// =============================================================================

/// Parameters carried by a `start` command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissionParams {
    /// Seconds between ball drops.
    pub interval_s: f64,
    /// Seconds to wait before the first drop.
    pub delay_s: f64,
    /// Dropper stepper motor rate.
    pub step_hz: u32,
}

impl MissionParams {
    /// Derives the drop interval from drone speed and desired ball spacing.
    ///
    /// ## Rules
    /// - velocity 0.1–100 m/s
    /// - spacing 0.1–1000 m
    /// - delay 0–120 s
    /// - step rate 1–50000 Hz
    pub fn from_operator_input(
        velocity_mps: f64,
        spacing_m: f64,
        delay_s: f64,
        step_hz: u32,
    ) -> ValidationResult<Self> {
        check_range("velocity_mps", velocity_mps, VELOCITY_RANGE)?;
        check_range("spacing_m", spacing_m, SPACING_RANGE)?;
        check_range("delay_s", delay_s, DELAY_RANGE)?;
        check_range(
            "step_hz",
            step_hz as f64,
            (STEP_HZ_RANGE.0 as f64, STEP_HZ_RANGE.1 as f64),
        )?;

        Ok(MissionParams {
            interval_s: spacing_m / velocity_mps,
            delay_s,
            step_hz,
        })
    }
}

fn check_range(field: &'static str, value: f64, (min, max): (f64, f64)) -> ValidationResult<()> {
    // NaN fails both comparisons, so test for containment rather than exclusion
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_speed_and_spacing() {
        let params = MissionParams::from_operator_input(10.0, 30.0, 10.0, 200).unwrap();
        assert_eq!(params.interval_s, 3.0);
        assert_eq!(params.delay_s, 10.0);
        assert_eq!(params.step_hz, 200);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(MissionParams::from_operator_input(0.05, 30.0, 10.0, 200).is_err());
        assert!(MissionParams::from_operator_input(10.0, 2000.0, 10.0, 200).is_err());
        assert!(MissionParams::from_operator_input(10.0, 30.0, 121.0, 200).is_err());
        assert!(MissionParams::from_operator_input(10.0, 30.0, 10.0, 0).is_err());
        assert!(MissionParams::from_operator_input(f64::NAN, 30.0, 10.0, 200).is_err());
    }

    #[test]
    fn test_bounds_inclusive() {
        assert!(MissionParams::from_operator_input(0.1, 0.1, 0.0, 1).is_ok());
        assert!(MissionParams::from_operator_input(100.0, 1000.0, 120.0, 50_000).is_ok());
    }
}
