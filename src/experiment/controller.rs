//! Sweep-and-acquire controller.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Running ──┬──► Completed ──┐
//!                    ├──► Cancelled ──┼──► Recovering ──► Idle
//!                    └──► Faulted ────┘
//! ```
//!
//! A sweep walks its plan as nested loops, outermost axis slowest. Outer axes
//! are commanded when their loop index changes; the innermost axis is
//! commanded once per innermost iteration, followed by a frame grab and a
//! store into the next stack slot.
//!
//! - **Cancellation** is polled at the top of every innermost iteration. With
//!   [`CancelScope::InnermostLoop`] only the innermost loop is left; outer
//!   loops keep stepping (and commanding their axes) but acquire nothing
//!   more. [`CancelScope::EntireSweep`] stops the traversal outright.
//! - **Faults** (any error out of the per-coordinate body) end the traversal.
//! - **Recovery** runs after every traversal, whatever its outcome, and
//!   writes back the channel values each swept axis had when the controller
//!   was built.
//!
//! [`SweepController::run`] never returns an error: the outcome, counters,
//! fault message and partial or complete stack all live on the returned
//! [`SweepState`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::data::frame::Sample;
use crate::data::stack::{Stack, StackAssembler};
use crate::error::{AppResult, SweepError};
use crate::experiment::grid::GridSpec;
use crate::experiment::plan::{PlanAxis, SweepPlan};
use crate::experiment::recovery::{RecoveryGuard, RecoveryRecord};
use crate::hardware::actuator::{CommandOutcome, SafeActuator};
use crate::hardware::axis::{Baseline, ControlAxis, Setpoint};
use crate::hardware::capabilities::{CancellationSignal, DetectorSource, InstrumentControl};
use crate::hardware::grabber::FrameGrabber;

/// How far a cancellation reaches in a multi-axis sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelScope {
    /// Leave the innermost loop only; outer loops continue to step.
    #[default]
    InnermostLoop,
    /// Stop the whole traversal.
    EntireSweep,
}

/// Controller lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    /// Not sweeping
    Idle,
    /// Traversing the plan
    Running,
    /// Traversal visited every coordinate
    Completed,
    /// Traversal stopped early on request
    Cancelled,
    /// Traversal stopped on an error
    Faulted,
    /// Returning axes to baseline
    Recovering,
}

impl SweepPhase {
    fn can_transition_to(self, next: SweepPhase) -> bool {
        use SweepPhase::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Faulted)
                | (Completed, Recovering)
                | (Cancelled, Recovering)
                | (Faulted, Recovering)
                | (Recovering, Idle)
        )
    }
}

/// How a traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepOutcome {
    /// Every coordinate visited
    Completed,
    /// Stopped on request
    Cancelled,
    /// Stopped on an error
    Faulted,
}

impl SweepOutcome {
    fn phase(self) -> SweepPhase {
        match self {
            SweepOutcome::Completed => SweepPhase::Completed,
            SweepOutcome::Cancelled => SweepPhase::Cancelled,
            SweepOutcome::Faulted => SweepPhase::Faulted,
        }
    }
}

/// Progress and result of one sweep.
#[derive(Debug)]
pub struct SweepState<T> {
    run_uid: String,
    started_at: DateTime<Utc>,
    phase: SweepPhase,
    history: Vec<SweepPhase>,
    assembler: StackAssembler<T>,
    rejected_setpoints: usize,
    actuation_timeouts: usize,
    outcome: Option<SweepOutcome>,
    fault: Option<String>,
    recovery: Vec<RecoveryRecord>,
}

impl<T: Sample> SweepState<T> {
    fn new(planned_frames: usize) -> Self {
        Self {
            run_uid: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            phase: SweepPhase::Idle,
            history: vec![SweepPhase::Idle],
            assembler: StackAssembler::new(planned_frames),
            rejected_setpoints: 0,
            actuation_timeouts: 0,
            outcome: None,
            fault: None,
            recovery: Vec::new(),
        }
    }

    fn transition(&mut self, next: SweepPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(from = ?self.phase, to = ?next, "Unexpected sweep phase transition");
        }
        debug!(run_uid = %self.run_uid, from = ?self.phase, to = ?next, "Sweep phase");
        self.phase = next;
        self.history.push(next);
    }

    /// Unique id of this sweep.
    pub fn run_uid(&self) -> &str {
        &self.run_uid
    }

    /// When the sweep started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current phase (`Idle` once `run` has returned).
    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    /// Every phase visited, in order.
    pub fn history(&self) -> &[SweepPhase] {
        &self.history
    }

    /// Frame count fixed before acquisition began.
    pub fn planned_frames(&self) -> usize {
        self.assembler.planned_frames()
    }

    /// Frames acquired and stored.
    pub fn frames_acquired(&self) -> usize {
        self.assembler.stored()
    }

    /// Whether fewer frames were stored than planned.
    pub fn is_partial(&self) -> bool {
        self.frames_acquired() < self.planned_frames()
    }

    /// Setpoints skipped for exceeding a hard bound.
    pub fn rejected_setpoints(&self) -> usize {
        self.rejected_setpoints
    }

    /// Set-control calls that timed out.
    pub fn actuation_timeouts(&self) -> usize {
        self.actuation_timeouts
    }

    /// How the traversal ended.
    pub fn outcome(&self) -> Option<SweepOutcome> {
        self.outcome
    }

    /// Fault message, if the traversal faulted.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Per-axis recovery results, innermost axis first.
    pub fn recovery(&self) -> &[RecoveryRecord] {
        &self.recovery
    }

    /// Stack assembled so far; `None` if no frame was acquired.
    pub fn stack(&self) -> Option<&Stack<T>> {
        self.assembler.stack()
    }

    /// Hand off the stack.
    pub fn into_stack(self) -> Option<Stack<T>> {
        self.assembler.finish()
    }
}

/// Axis selection for a plan; `grid: None` uses the axis default.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisRequest {
    /// Axis name
    pub axis: String,
    /// Step/max override
    pub grid: Option<GridSpec>,
}

impl AxisRequest {
    /// Request `axis` with its default grid.
    pub fn new(axis: &str) -> Self {
        Self {
            axis: axis.to_string(),
            grid: None,
        }
    }

    /// Override step and maximum excursion.
    pub fn with_grid(mut self, step: f64, max: f64) -> Self {
        self.grid = Some(GridSpec::new(step, max));
        self
    }
}

/// Orchestrates actuation, acquisition and stacking over a plan.
pub struct SweepController<C> {
    actuator: SafeActuator<C>,
    grabber: FrameGrabber,
    axes: Vec<(ControlAxis, Baseline)>,
    cancel_scope: CancelScope,
}

impl<C: InstrumentControl> SweepController<C> {
    /// Build a controller for `axes`, reading each axis baseline from the
    /// instrument.
    pub async fn new(
        instrument: Arc<C>,
        axes: Vec<ControlAxis>,
        cancel_scope: CancelScope,
    ) -> AppResult<Self> {
        let actuator = SafeActuator::new(instrument);
        let mut with_baselines = Vec::with_capacity(axes.len());
        for axis in axes {
            let baseline = actuator.read_baseline(&axis).await?;
            info!(axis = %axis.name, baseline = %baseline, "Start position");
            with_baselines.push((axis, baseline));
        }
        Ok(Self {
            actuator,
            grabber: FrameGrabber,
            axes: with_baselines,
            cancel_scope,
        })
    }

    fn lookup(&self, name: &str) -> Option<&(ControlAxis, Baseline)> {
        self.axes.iter().find(|(axis, _)| axis.name == name)
    }

    /// Compute grids for `requests` (outermost first) around the captured
    /// baselines.
    pub fn plan(&self, requests: &[AxisRequest]) -> AppResult<SweepPlan> {
        let axes = requests
            .iter()
            .map(|request| {
                let (axis, baseline) = self
                    .lookup(&request.axis)
                    .ok_or_else(|| SweepError::UnknownAxis(request.axis.clone()))?;
                let spec = request.grid.unwrap_or(axis.default_grid);
                PlanAxis::new(axis.clone(), baseline.logical, spec)
            })
            .collect::<AppResult<Vec<_>>>()?;

        let plan = SweepPlan::new(axes)?;
        info!(
            axes = ?plan.axis_names(),
            total_frames = plan.total_frames(),
            "Planned sweep"
        );
        Ok(plan)
    }

    /// Run `plan`, grabbing frames from `detector`.
    pub async fn run<D: DetectorSource>(
        &self,
        plan: &SweepPlan,
        detector: &D,
        cancel: &dyn CancellationSignal,
    ) -> SweepState<D::Sample> {
        let mut state = SweepState::new(plan.total_frames());
        info!(
            run_uid = %state.run_uid,
            source = detector.source_id(),
            planned_frames = plan.total_frames(),
            "Starting sweep"
        );
        state.transition(SweepPhase::Running);

        let mut targets: Vec<(&ControlAxis, Baseline)> = Vec::with_capacity(plan.axes().len());
        let mut unknown = None;
        for planned in plan.axes() {
            match self.lookup(&planned.axis().name) {
                Some((axis, baseline)) => targets.push((axis, *baseline)),
                None => unknown = unknown.or_else(|| Some(planned.axis().name.clone())),
            }
        }

        let guard = RecoveryGuard::arm(targets.clone());

        let result = match unknown {
            Some(name) => Err(SweepError::UnknownAxis(name)),
            None => {
                self.traverse(plan, &targets, detector, cancel, &mut state)
                    .await
            }
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(run_uid = %state.run_uid, error = %err, "Sweep faulted");
                state.fault = Some(err.to_string());
                SweepOutcome::Faulted
            }
        };
        state.outcome = Some(outcome);
        state.transition(outcome.phase());
        info!(
            run_uid = %state.run_uid,
            ?outcome,
            acquired = state.frames_acquired(),
            planned = state.planned_frames(),
            "Sweep ended"
        );

        state.transition(SweepPhase::Recovering);
        state.recovery = guard.restore(&self.actuator).await;
        state.transition(SweepPhase::Idle);
        state
    }

    async fn traverse<D: DetectorSource>(
        &self,
        plan: &SweepPlan,
        targets: &[(&ControlAxis, Baseline)],
        detector: &D,
        cancel: &dyn CancellationSignal,
        state: &mut SweepState<D::Sample>,
    ) -> AppResult<SweepOutcome> {
        let dims = plan.dimensions();
        let depth = dims.len();
        let spans = dimension_spans(plan);
        let inner = plan.axes().len() - 1;

        let mut index = vec![0usize; depth];
        // shallowest loop level whose index changed since the last iteration
        let mut entered = 0usize;
        let mut cancelled = false;

        loop {
            for (a, span) in spans.iter().enumerate().take(inner) {
                if entered < span.end {
                    let setpoint = setpoint_at(&plan.axes()[a], &index[span.clone()])?;
                    self.apply(targets[a].0, setpoint, state).await?;
                }
            }

            if cancel.is_cancelled() {
                if !cancelled {
                    info!(acquired = state.frames_acquired(), "Cancellation requested");
                }
                cancelled = true;
                match self.cancel_scope {
                    CancelScope::EntireSweep => break,
                    CancelScope::InnermostLoop => index[depth - 1] = dims[depth - 1] - 1,
                }
            } else {
                let span = spans[inner].clone();
                let setpoint = setpoint_at(&plan.axes()[inner], &index[span])?;
                info!(
                    count = state.frames_acquired(),
                    axis = %targets[inner].0.name,
                    setpoint = %setpoint,
                    "Acquiring"
                );
                self.apply(targets[inner].0, setpoint, state).await?;
                let frame = self.grabber.grab(detector).await?;
                state.assembler.push(&frame)?;
            }

            match advance(&mut index, &dims) {
                Some(level) => entered = level,
                None => break,
            }
        }

        Ok(if cancelled {
            SweepOutcome::Cancelled
        } else {
            SweepOutcome::Completed
        })
    }

    async fn apply<T: Sample>(
        &self,
        axis: &ControlAxis,
        setpoint: Setpoint,
        state: &mut SweepState<T>,
    ) -> AppResult<()> {
        match self.actuator.command(axis, setpoint).await? {
            CommandOutcome::Applied => {}
            CommandOutcome::Rejected => state.rejected_setpoints += 1,
            CommandOutcome::TimedOut => state.actuation_timeouts += 1,
        }
        Ok(())
    }
}

/// Range of flattened loop levels owned by each plan axis.
fn dimension_spans(plan: &SweepPlan) -> Vec<Range<usize>> {
    let mut start = 0;
    plan.axes()
        .iter()
        .map(|a| {
            let span = start..start + a.grids().len();
            start = span.end;
            span
        })
        .collect()
}

fn setpoint_at(axis: &PlanAxis, indices: &[usize]) -> AppResult<Setpoint> {
    axis.setpoint_at(indices)
        .ok_or_else(|| SweepError::SetpointArity {
            axis: axis.axis().name.clone(),
            expected: axis.axis().components(),
            actual: indices.len(),
        })
}

/// Step the loop indices like nested `for` loops. Returns the shallowest
/// level that changed, or `None` once the outermost loop is exhausted.
fn advance(index: &mut [usize], dims: &[usize]) -> Option<usize> {
    for level in (0..index.len()).rev() {
        index[level] += 1;
        if index[level] < dims[level] {
            return Some(level);
        }
        index[level] = 0;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::axis::DeflectionRotation;
    use crate::hardware::capabilities::NeverCancelled;
    use crate::hardware::mock::{MockDetector, MockInstrument};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn deflection() -> ControlAxis {
        ControlAxis::rotated_pair(
            "deflection",
            "rad",
            "CapPure.a",
            "CapPure.b",
            DeflectionRotation::identity(),
            (1.0, 3.0),
            Duration::from_millis(1500),
            GridSpec::new(0.25, 0.25),
        )
    }

    fn energy() -> ControlAxis {
        ControlAxis::scalar(
            "energy",
            "V",
            "DriftTubeVolts",
            2.0,
            Duration::from_millis(1500),
            GridSpec::new(0.5, 0.5),
        )
    }

    async fn controller(
        axes: Vec<ControlAxis>,
        scope: CancelScope,
    ) -> (Arc<MockInstrument>, SweepController<MockInstrument>) {
        let instrument = Arc::new(MockInstrument::new());
        for control in ["CapPure.a", "CapPure.b", "DriftTubeVolts", "C10"] {
            instrument.preset(control, 0.0);
        }
        let controller = SweepController::new(instrument.clone(), axes, scope)
            .await
            .unwrap();
        (instrument, controller)
    }

    #[test]
    fn test_advance_matches_nested_loops() {
        let dims = [2, 3];
        let mut index = vec![0, 0];
        let mut visited = vec![index.clone()];
        while advance(&mut index, &dims).is_some() {
            visited.push(index.clone());
        }
        assert_eq!(
            visited,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2]
            ]
        );
    }

    #[test]
    fn test_advance_reports_changed_level() {
        let dims = [2, 2];
        let mut index = vec![0, 1];
        assert_eq!(advance(&mut index, &dims), Some(0));
        assert_eq!(index, vec![1, 0]);
    }

    #[test]
    fn test_phase_table() {
        assert!(SweepPhase::Idle.can_transition_to(SweepPhase::Running));
        assert!(SweepPhase::Faulted.can_transition_to(SweepPhase::Recovering));
        assert!(!SweepPhase::Running.can_transition_to(SweepPhase::Idle));
        assert!(!SweepPhase::Completed.can_transition_to(SweepPhase::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_axis_in_request() {
        let (_, controller) = controller(vec![energy()], CancelScope::default()).await;
        let result = controller.plan(&[AxisRequest::new("defocus")]);
        assert!(matches!(result, Err(SweepError::UnknownAxis(name)) if name == "defocus"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_construction_fails_without_baseline() {
        let instrument = Arc::new(MockInstrument::new());
        let result =
            SweepController::new(instrument, vec![energy()], CancelScope::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_sweep_history() {
        let (_, controller) = controller(vec![deflection()], CancelScope::default()).await;
        let plan = controller.plan(&[AxisRequest::new("deflection")]).unwrap();
        let detector = MockDetector::new("autotuning_camera", 2, 2);

        let state = controller.run(&plan, &detector, &NeverCancelled).await;

        assert_eq!(state.outcome(), Some(SweepOutcome::Completed));
        assert_eq!(
            state.history(),
            &[
                SweepPhase::Idle,
                SweepPhase::Running,
                SweepPhase::Completed,
                SweepPhase::Recovering,
                SweepPhase::Idle
            ]
        );
        assert_eq!(state.frames_acquired(), 9);
        assert!(!state.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_axis_commanded_once_per_outer_step() {
        let (instrument, controller) =
            controller(vec![energy(), deflection()], CancelScope::default()).await;
        let plan = controller
            .plan(&[AxisRequest::new("energy"), AxisRequest::new("deflection")])
            .unwrap();
        let detector = MockDetector::new("eels_camera", 1, 1);

        let state = controller.run(&plan, &detector, &NeverCancelled).await;

        assert_eq!(state.planned_frames(), 27);
        assert_eq!(state.frames_acquired(), 27);
        // three energy steps plus recovery
        assert_eq!(
            instrument.set_calls_for("DriftTubeVolts"),
            vec![-0.5, 0.0, 0.5, 0.0]
        );
        // one deflection command per frame plus recovery
        assert_eq!(instrument.set_calls_for("CapPure.a").len(), 28);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entire_sweep_scope_stops_outer_loops() {
        let flag = Arc::new(AtomicBool::new(false));
        let (instrument, controller) =
            controller(vec![energy(), deflection()], CancelScope::EntireSweep).await;
        let plan = controller
            .plan(&[AxisRequest::new("energy"), AxisRequest::new("deflection")])
            .unwrap();
        let detector = MockDetector::new("eels_camera", 1, 1);
        detector.cancel_after(2, flag.clone());

        let state = controller.run(&plan, &detector, &*flag).await;

        assert_eq!(state.outcome(), Some(SweepOutcome::Cancelled));
        assert_eq!(state.frames_acquired(), 2);
        // first energy step plus recovery only
        assert_eq!(instrument.set_calls_for("DriftTubeVolts"), vec![-0.5, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_innermost_scope_keeps_stepping_outer_axis() {
        let flag = Arc::new(AtomicBool::new(false));
        let (instrument, controller) =
            controller(vec![energy(), deflection()], CancelScope::InnermostLoop).await;
        let plan = controller
            .plan(&[AxisRequest::new("energy"), AxisRequest::new("deflection")])
            .unwrap();
        let detector = MockDetector::new("eels_camera", 1, 1);
        detector.cancel_after(2, flag.clone());

        let state = controller.run(&plan, &detector, &*flag).await;

        assert_eq!(state.outcome(), Some(SweepOutcome::Cancelled));
        assert_eq!(state.frames_acquired(), 2);
        assert_eq!(
            instrument.set_calls_for("DriftTubeVolts"),
            vec![-0.5, 0.0, 0.5, 0.0]
        );
    }
}
