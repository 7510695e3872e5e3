//! Sweep plans.
//!
//! A [`SweepPlan`] is the Cartesian product of the grids of one or more axes,
//! in a fixed nesting order: the first axis is iterated slowest. A rotated
//! deflection pair contributes two nested grids (Da outer, Db inner) but is
//! commanded as one setpoint.
//!
//! The total frame count is the product of all grid lengths. It is computed
//! when the plan is built and never changes afterwards, and may not exceed
//! [`MAX_PLANNED_FRAMES`].

use serde::Serialize;

use crate::error::{AppResult, SweepError};
use crate::experiment::grid::{axis_grid, Grid, GridSpec};
use crate::hardware::axis::{ControlAxis, Setpoint};

/// Most frames a single plan may allocate.
pub const MAX_PLANNED_FRAMES: usize = 100_000;

/// Product of `dimensions`, checked against [`MAX_PLANNED_FRAMES`].
///
/// # Errors
/// `PlanTooLarge` if the product overflows or exceeds the ceiling.
pub fn frame_count(dimensions: &[usize]) -> AppResult<usize> {
    dimensions
        .iter()
        .try_fold(1usize, |acc, &len| acc.checked_mul(len))
        .filter(|&frames| frames <= MAX_PLANNED_FRAMES)
        .ok_or_else(|| SweepError::PlanTooLarge {
            dimensions: dimensions.to_vec(),
            limit: MAX_PLANNED_FRAMES,
        })
}

/// One axis of a plan with its baseline and per-component grids.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanAxis {
    axis: ControlAxis,
    baseline: Setpoint,
    spec: GridSpec,
    grids: Vec<Grid>,
}

impl PlanAxis {
    /// Compute the grids for `axis` centred on `baseline`.
    pub fn new(axis: ControlAxis, baseline: Setpoint, spec: GridSpec) -> AppResult<Self> {
        if baseline.components() != axis.components() {
            return Err(SweepError::SetpointArity {
                axis: axis.name.clone(),
                expected: axis.components(),
                actual: baseline.components(),
            });
        }

        let grids = axis
            .control_names()
            .into_iter()
            .zip(baseline.values())
            .map(|(control, center)| axis_grid(&format!("{}:{}", axis.name, control), spec, center))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            axis,
            baseline,
            spec,
            grids,
        })
    }

    /// Axis descriptor.
    pub fn axis(&self) -> &ControlAxis {
        &self.axis
    }

    /// Baseline the grids are centred on.
    pub fn baseline(&self) -> Setpoint {
        self.baseline
    }

    /// Step/max used to build the grids.
    pub fn spec(&self) -> GridSpec {
        self.spec
    }

    /// Per-component grids, outer component first.
    pub fn grids(&self) -> &[Grid] {
        &self.grids
    }

    /// Setpoint at per-component grid `indices`.
    pub fn setpoint_at(&self, indices: &[usize]) -> Option<Setpoint> {
        let values = self
            .grids
            .iter()
            .zip(indices)
            .map(|(grid, &i)| grid.get(i))
            .collect::<Option<Vec<_>>>()?;
        Setpoint::from_values(&values)
    }
}

/// Ordered product of axis grids.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    axes: Vec<PlanAxis>,
    total_frames: usize,
}

impl SweepPlan {
    /// Build a plan from axes in nesting order (outermost first).
    ///
    /// # Errors
    /// `Configuration` if `axes` is empty; `PlanTooLarge` past
    /// [`MAX_PLANNED_FRAMES`].
    pub fn new(axes: Vec<PlanAxis>) -> AppResult<Self> {
        if axes.is_empty() {
            return Err(SweepError::Configuration(
                "a sweep plan needs at least one axis".into(),
            ));
        }
        let dimensions: Vec<usize> = axes
            .iter()
            .flat_map(|a| a.grids.iter())
            .map(Grid::len)
            .collect();
        let total_frames = frame_count(&dimensions)?;
        Ok(Self { axes, total_frames })
    }

    /// Axes, outermost first.
    pub fn axes(&self) -> &[PlanAxis] {
        &self.axes
    }

    /// Planned frame count (product of all grid lengths).
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Grid lengths flattened across axes and components, outermost first.
    pub fn dimensions(&self) -> Vec<usize> {
        self.axes
            .iter()
            .flat_map(|a| a.grids.iter().map(Grid::len))
            .collect()
    }

    /// Names of the swept axes, outermost first.
    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.axis.name.as_str()).collect()
    }

    /// Serializable description of the plan.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            total_frames: self.total_frames,
            axes: self
                .axes
                .iter()
                .map(|a| AxisSummary {
                    name: a.axis.name.clone(),
                    unit: a.axis.unit.clone(),
                    controls: a
                        .axis
                        .control_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    step: a.spec.step,
                    max: a.spec.max,
                    baseline: a.baseline.values(),
                    grids: a.grids.iter().map(|g| g.points().to_vec()).collect(),
                })
                .collect(),
        }
    }
}

/// Serializable plan description for operators.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    /// Planned frame count
    pub total_frames: usize,
    /// Axes, outermost first
    pub axes: Vec<AxisSummary>,
}

/// One axis in a [`PlanSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct AxisSummary {
    /// Axis name
    pub name: String,
    /// Physical unit
    pub unit: String,
    /// Controls driven
    pub controls: Vec<String>,
    /// Grid step
    pub step: f64,
    /// Grid maximum excursion
    pub max: f64,
    /// Baseline per component
    pub baseline: Vec<f64>,
    /// Grid per component
    pub grids: Vec<Vec<f64>>,
}
