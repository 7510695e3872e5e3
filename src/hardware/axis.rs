//! Control axis descriptors.
//!
//! A [`ControlAxis`] names one physically actuated quantity: a single control
//! channel (drift-tube energy offset, defocus) or the deflection pair, which is
//! addressed in logical (Da, Db) coordinates and rotated onto the physical
//! (X, Y) channels before being sent.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_4;
use std::fmt;
use std::time::Duration;

use crate::experiment::grid::GridSpec;

/// Empirically tuned offset added to the 45° deflection rotation.
pub const DEFAULT_ROTATION_OFFSET_RAD: f64 = 0.01448;

/// Static calibration mapping logical deflection (Da, Db) onto the physical
/// (X, Y) channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeflectionRotation {
    /// Nominal angle between logical and physical frames
    pub base_angle_rad: f64,
    /// Tuned correction added to `base_angle_rad`
    pub offset_rad: f64,
}

impl Default for DeflectionRotation {
    fn default() -> Self {
        Self {
            base_angle_rad: FRAC_PI_4,
            offset_rad: DEFAULT_ROTATION_OFFSET_RAD,
        }
    }
}

impl DeflectionRotation {
    /// Rotation without the tuned offset.
    pub fn identity() -> Self {
        Self {
            base_angle_rad: 0.0,
            offset_rad: 0.0,
        }
    }

    /// Total rotation angle in radians.
    pub fn angle(&self) -> f64 {
        self.base_angle_rad + self.offset_rad
    }

    /// Map logical (Da, Db) to physical (X, Y).
    pub fn to_physical(&self, da: f64, db: f64) -> (f64, f64) {
        let (sin, cos) = self.angle().sin_cos();
        (da * cos - db * sin, da * sin + db * cos)
    }

    /// Map physical (X, Y) back to logical (Da, Db).
    pub fn to_logical(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.angle().sin_cos();
        (x * cos + y * sin, -x * sin + y * cos)
    }
}

/// Instrument channels an axis drives.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisChannels {
    /// One control, commanded directly.
    Single {
        /// Control name
        control: String,
    },
    /// Two controls commanded jointly through a rotation.
    RotatedPair {
        /// Physical X channel
        control_a: String,
        /// Physical Y channel
        control_b: String,
        /// Logical-to-physical calibration
        rotation: DeflectionRotation,
    },
}

/// A value for every component of an axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setpoint {
    /// Single-channel axis value
    Scalar(f64),
    /// Logical (Da, Db) for a rotated pair
    Pair(f64, f64),
}

impl Setpoint {
    /// Number of components.
    pub fn components(&self) -> usize {
        match self {
            Setpoint::Scalar(_) => 1,
            Setpoint::Pair(..) => 2,
        }
    }

    /// Component values in axis order.
    pub fn values(&self) -> Vec<f64> {
        match *self {
            Setpoint::Scalar(v) => vec![v],
            Setpoint::Pair(a, b) => vec![a, b],
        }
    }

    /// Build a setpoint from per-component values.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        match *values {
            [v] => Some(Setpoint::Scalar(v)),
            [a, b] => Some(Setpoint::Pair(a, b)),
            _ => None,
        }
    }
}

impl fmt::Display for Setpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setpoint::Scalar(v) => write!(f, "{v:e}"),
            Setpoint::Pair(a, b) => write!(f, "({a:e}, {b:e})"),
        }
    }
}

/// Where an axis started.
///
/// `readings` are the raw channel values read from the instrument and are
/// what recovery writes back. `logical` is the same position in the axis's
/// logical coordinates; grids are centred on it and bounds are checked
/// against it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    /// Position in logical coordinates
    pub logical: Setpoint,
    /// Raw channel values, in control order
    pub readings: Setpoint,
}

impl fmt::Display for Baseline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.readings)
    }
}

/// One physically actuated quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlAxis {
    /// Symbolic axis name used by plans ("deflection", "energy", "defocus")
    pub name: String,
    /// Physical unit of the commanded value
    pub unit: String,
    /// Channels driven by this axis
    pub channels: AxisChannels,
    /// Absolute limit per component; a commanded magnitude above it is rejected
    pub hard_bounds: Vec<f64>,
    /// Delay after every accepted command
    pub settle_time: Duration,
    /// Grid used when a plan does not override step/max
    pub default_grid: GridSpec,
}

impl ControlAxis {
    /// Single-channel axis.
    pub fn scalar(
        name: &str,
        unit: &str,
        control: &str,
        hard_bound: f64,
        settle_time: Duration,
        default_grid: GridSpec,
    ) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            channels: AxisChannels::Single {
                control: control.to_string(),
            },
            hard_bounds: vec![hard_bound],
            settle_time,
            default_grid,
        }
    }

    /// Rotated deflection pair.
    #[allow(clippy::too_many_arguments)]
    pub fn rotated_pair(
        name: &str,
        unit: &str,
        control_a: &str,
        control_b: &str,
        rotation: DeflectionRotation,
        hard_bounds: (f64, f64),
        settle_time: Duration,
        default_grid: GridSpec,
    ) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            channels: AxisChannels::RotatedPair {
                control_a: control_a.to_string(),
                control_b: control_b.to_string(),
                rotation,
            },
            hard_bounds: vec![hard_bounds.0, hard_bounds.1],
            settle_time,
            default_grid,
        }
    }

    /// Number of logical components (1 or 2).
    pub fn components(&self) -> usize {
        match self.channels {
            AxisChannels::Single { .. } => 1,
            AxisChannels::RotatedPair { .. } => 2,
        }
    }

    /// Control names in component order.
    pub fn control_names(&self) -> Vec<&str> {
        match &self.channels {
            AxisChannels::Single { control } => vec![control.as_str()],
            AxisChannels::RotatedPair {
                control_a,
                control_b,
                ..
            } => vec![control_a.as_str(), control_b.as_str()],
        }
    }

    /// Baseline for raw channel `readings` taken from the instrument.
    pub fn baseline_from_readings(&self, readings: Setpoint) -> Baseline {
        let logical = match (&self.channels, readings) {
            (AxisChannels::RotatedPair { rotation, .. }, Setpoint::Pair(x, y)) => {
                let (da, db) = rotation.to_logical(x, y);
                Setpoint::Pair(da, db)
            }
            _ => readings,
        };
        Baseline { logical, readings }
    }

    /// Whether every component of `setpoint` is within its hard bound.
    ///
    /// The check applies to the logical value, before any rotation.
    pub fn within_bounds(&self, setpoint: &Setpoint) -> bool {
        setpoint
            .values()
            .iter()
            .zip(&self.hard_bounds)
            .all(|(value, bound)| value.abs() <= *bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridSpec {
        GridSpec::new(1.0, 2.0)
    }

    #[test]
    fn test_identity_rotation_passes_through() {
        let (x, y) = DeflectionRotation::identity().to_physical(0.3, -0.7);
        assert!((x - 0.3).abs() < 1e-12);
        assert!((y + 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_default_rotation_angle() {
        let rotation = DeflectionRotation::default();
        assert!((rotation.angle() - (FRAC_PI_4 + 0.01448)).abs() < 1e-15);
    }

    #[test]
    fn test_rotation_preserves_magnitude() {
        let rotation = DeflectionRotation::default();
        let (x, y) = rotation.to_physical(3.0, 4.0);
        assert!(((x * x + y * y).sqrt() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_to_logical_inverts_to_physical() {
        let rotation = DeflectionRotation::default();
        let (da, db) = rotation.to_logical(0.01, -0.02);
        let (x, y) = rotation.to_physical(da, db);
        assert!((x - 0.01).abs() < 1e-15);
        assert!((y + 0.02).abs() < 1e-15);
    }

    #[test]
    fn test_pair_baseline_keeps_raw_readings() {
        let rotation = DeflectionRotation::default();
        let axis = ControlAxis::rotated_pair(
            "deflection",
            "rad",
            "CapPure.a",
            "CapPure.b",
            rotation,
            (1.0, 3.0),
            Duration::ZERO,
            grid(),
        );
        let baseline = axis.baseline_from_readings(Setpoint::Pair(0.01, -0.02));
        assert_eq!(baseline.readings, Setpoint::Pair(0.01, -0.02));
        let (da, db) = rotation.to_logical(0.01, -0.02);
        assert_eq!(baseline.logical, Setpoint::Pair(da, db));
    }

    #[test]
    fn test_scalar_baseline_is_unrotated() {
        let axis = ControlAxis::scalar("defocus", "m", "C10", 6e-6, Duration::ZERO, grid());
        let baseline = axis.baseline_from_readings(Setpoint::Scalar(1e-7));
        assert_eq!(baseline.logical, baseline.readings);
    }

    #[test]
    fn test_pair_bounds_are_per_component() {
        let axis = ControlAxis::rotated_pair(
            "deflection",
            "rad",
            "CapPure.a",
            "CapPure.b",
            DeflectionRotation::default(),
            (1.0, 3.0),
            Duration::from_millis(1500),
            grid(),
        );
        assert!(axis.within_bounds(&Setpoint::Pair(1.0, 2.5)));
        assert!(!axis.within_bounds(&Setpoint::Pair(1.1, 0.0)));
        assert!(!axis.within_bounds(&Setpoint::Pair(0.0, -3.2)));
    }

    #[test]
    fn test_scalar_bound_is_inclusive() {
        let axis = ControlAxis::scalar(
            "energy",
            "V",
            "DriftTubeVolts",
            2.0,
            Duration::ZERO,
            grid(),
        );
        assert!(axis.within_bounds(&Setpoint::Scalar(-2.0)));
        assert!(!axis.within_bounds(&Setpoint::Scalar(2.0001)));
    }

    #[test]
    fn test_setpoint_from_values() {
        assert_eq!(Setpoint::from_values(&[1.0]), Some(Setpoint::Scalar(1.0)));
        assert_eq!(
            Setpoint::from_values(&[1.0, 2.0]),
            Some(Setpoint::Pair(1.0, 2.0))
        );
        assert_eq!(Setpoint::from_values(&[]), None);
    }
}
