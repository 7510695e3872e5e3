//! Symmetric coordinate grids.
//!
//! A grid for one axis component spans `[baseline - max, baseline + max]` with
//! `2 * floor(max / step) + 1` evenly spaced points. The point count is always
//! odd, so the midpoint sits exactly on the baseline. When `step > max` the
//! grid collapses to the single baseline point; that is accepted, not rejected.
//! A spec whose point count exceeds [`MAX_AXIS_POINTS`] is rejected.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppResult, SweepError};

/// Most points a single axis component may visit.
pub const MAX_AXIS_POINTS: usize = 1_001;

/// Step size and maximum excursion for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Spacing between adjacent points
    pub step: f64,
    /// Largest offset from the baseline, in either direction
    pub max: f64,
}

impl GridSpec {
    /// Create a grid specification.
    pub fn new(step: f64, max: f64) -> Self {
        Self { step, max }
    }

    /// Number of points this spec produces.
    pub fn point_count(&self) -> usize {
        half_width(self.step, self.max)
            .saturating_mul(2)
            .saturating_add(1)
    }

    /// Check `step > 0`, `max > 0` and the point count against
    /// [`MAX_AXIS_POINTS`].
    pub fn validate(&self, axis: &str) -> AppResult<()> {
        let finite = self.step.is_finite() && self.max.is_finite();
        if !finite || self.step <= 0.0 || self.max <= 0.0 {
            return Err(SweepError::InvalidGrid {
                axis: axis.to_string(),
                step: self.step,
                max: self.max,
            });
        }
        let points = self.point_count();
        if points > MAX_AXIS_POINTS {
            return Err(SweepError::GridTooLarge {
                axis: axis.to_string(),
                points,
                limit: MAX_AXIS_POINTS,
            });
        }
        Ok(())
    }
}

/// Ordered setpoints for one axis component.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    points: Vec<f64>,
    baseline: f64,
}

impl Grid {
    /// Grid of `spec` centred on `baseline`.
    pub fn symmetric(spec: GridSpec, baseline: f64) -> Self {
        let k = half_width(spec.step, spec.max);
        let points = if k == 0 {
            vec![baseline]
        } else {
            let spacing = spec.max / k as f64;
            (0..=2 * k)
                .map(|i| baseline + (i as f64 - k as f64) * spacing)
                .collect()
        };
        Self { points, baseline }
    }

    /// Setpoints in traversal order.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Number of setpoints.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; a grid has at least its baseline point.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Value the grid is centred on.
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Setpoint at `index`.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.points.get(index).copied()
    }
}

/// Compute and log the grid for `label`.
///
/// # Errors
/// `InvalidGrid` unless `step > 0` and `max > 0`; `GridTooLarge` past
/// [`MAX_AXIS_POINTS`].
pub fn axis_grid(label: &str, spec: GridSpec, baseline: f64) -> AppResult<Grid> {
    spec.validate(label)?;
    let grid = Grid::symmetric(spec, baseline);
    info!(axis = label, points = grid.len(), grid = ?grid.points(), "Computed grid");
    Ok(grid)
}

fn half_width(step: f64, max: f64) -> usize {
    let ratio = (max / step).floor();
    if ratio.is_nan() || ratio <= 0.0 {
        0
    } else {
        // saturates at usize::MAX
        ratio as usize
    }
}
