//! Sweep orchestration.
//!
//! - [`grid`]: symmetric coordinate grids around a baseline
//! - [`plan`]: the ordered product of axis grids and its frame count
//! - [`controller`]: nested-loop traversal, cancellation and phases
//! - [`recovery`]: return-to-baseline on every exit path
//! - [`variants`]: the four sweep configurations
//! - [`session`]: operator confirmation and stack hand-off
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = SweepController::new(instrument, vec![settings.defocus_axis()], scope).await?;
//! let plan = controller.plan(&[AxisRequest::new("defocus")])?;
//! let state = controller.run(&plan, &eels_camera, &cancel_flag).await;
//! ```

pub mod controller;
pub mod grid;
pub mod plan;
pub mod recovery;
pub mod session;
pub mod variants;

pub use controller::{AxisRequest, CancelScope, SweepController, SweepOutcome, SweepPhase, SweepState};
pub use grid::{axis_grid, Grid, GridSpec};
pub use plan::{PlanAxis, PlanSummary, SweepPlan};
pub use recovery::{RecoveryGuard, RecoveryRecord};
pub use session::{AcquisitionSession, AutoConfirm, Operator, StdinOperator, VariantReport};
pub use variants::{DetectorKind, SweepVariant, DEFLECTION_AXIS, DEFOCUS_AXIS, ENERGY_AXIS};
