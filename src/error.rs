//! Custom error types for the sweep controller.
//!
//! Two enums cover the failure modes a sweep can run into:
//!
//! - **`ControlError`**: returned by the instrument-control collaborator when a
//!   set or get call fails. The `Timeout` variant is singled out because the
//!   safe actuator treats it as non-fatal (logged, sweep continues).
//! - **`SweepError`**: the crate-level error. Anything that escapes the
//!   per-coordinate body as a `SweepError` is an acquisition fault: the sweep
//!   stops for the remainder of its grid, but recovery to baseline still runs.
//!
//! Note that a sweep method never returns `Err` to its caller; faults are
//! recorded on the returned [`SweepState`](crate::experiment::SweepState).

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

/// Failure reported by the instrument-control backend.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The instrument did not confirm the set-control call in time.
    #[error("Timed out setting control '{control}'")]
    Timeout {
        /// Control channel that failed to confirm
        control: String,
    },

    /// The control name is not known to the instrument.
    #[error("Unknown control '{0}'")]
    UnknownControl(String),

    /// Any other backend failure.
    #[error("Instrument backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Non-timeout failure from the instrument-control backend.
    #[error("Instrument control error: {0}")]
    Control(#[from] ControlError),

    /// Failure reported by the detector source.
    #[error("Detector '{source_id}' failed: {message}")]
    Detector {
        /// Detector source id
        source_id: String,
        /// Underlying failure, rendered
        message: String,
    },

    /// A frame did not match the shape of the first frame in the stack.
    #[error("Frame shape {actual:?} does not match stack frame shape {expected:?}")]
    FrameShapeMismatch {
        /// (rows, columns) fixed by the first frame
        expected: (usize, usize),
        /// (rows, columns) of the offending frame
        actual: (usize, usize),
    },

    /// More frames were stored than the plan allocated.
    #[error("Stack index {index} out of range for {capacity} planned frames")]
    StackIndexOutOfRange {
        /// Requested slot
        index: usize,
        /// Planned frame count
        capacity: usize,
    },

    /// Setpoint has the wrong number of components for its axis.
    #[error("Axis '{axis}' takes {expected} component(s), got {actual}")]
    SetpointArity {
        /// Axis name
        axis: String,
        /// Components the axis drives
        expected: usize,
        /// Components supplied
        actual: usize,
    },

    /// A plan refers to an axis the controller was not constructed with.
    #[error("Unknown axis '{0}'")]
    UnknownAxis(String),

    /// Grid parameters violate `step > 0`, `max > 0`.
    #[error("Invalid grid for axis '{axis}': step={step}, max={max}")]
    InvalidGrid {
        /// Axis name
        axis: String,
        /// Requested step
        step: f64,
        /// Requested maximum excursion
        max: f64,
    },

    /// A grid has more points than one axis component may visit.
    #[error("Grid for axis '{axis}' has {points} points; at most {limit} allowed")]
    GridTooLarge {
        /// Axis name
        axis: String,
        /// Points the grid would have
        points: usize,
        /// Per-component ceiling
        limit: usize,
    },

    /// The product of all grid lengths exceeds the frame ceiling.
    #[error("Plan with dimensions {dimensions:?} exceeds {limit} frames")]
    PlanTooLarge {
        /// Grid lengths, outermost first
        dimensions: Vec<usize>,
        /// Frame ceiling
        limit: usize,
    },

    /// Semantic configuration error.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Publishing a finished stack failed.
    #[error("Data sink error: {0}")]
    Sink(String),

    /// Operator interaction failed.
    #[error("Operator prompt failed: {0}")]
    Operator(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SweepError::UnknownAxis("energy".to_string());
        assert_eq!(err.to_string(), "Unknown axis 'energy'");
    }

    #[test]
    fn test_timeout_wraps_into_sweep_error() {
        let err: SweepError = ControlError::Timeout {
            control: "C10".into(),
        }
        .into();
        assert!(err.to_string().contains("Timed out setting control 'C10'"));
    }

    #[test]
    fn test_shape_mismatch_reports_both_shapes() {
        let err = SweepError::FrameShapeMismatch {
            expected: (4, 8),
            actual: (8, 4),
        };
        let msg = err.to_string();
        assert!(msg.contains("(8, 4)"));
        assert!(msg.contains("(4, 8)"));
    }

    #[test]
    fn test_plan_too_large_lists_dimensions() {
        let err = SweepError::PlanTooLarge {
            dimensions: vec![1001, 1001],
            limit: 100_000,
        };
        assert_eq!(
            err.to_string(),
            "Plan with dimensions [1001, 1001] exceeds 100000 frames"
        );
    }
}
