//! Bounded, settle-disciplined actuation.
//!
//! `SafeActuator` is the only path by which the controller changes instrument
//! state:
//!
//! 1. The requested logical value is checked against the axis hard bound. A
//!    violation is **rejected**: no instrument call is made and the caller
//!    gets `CommandOutcome::Rejected` rather than an error.
//! 2. Accepted values are sent (two set calls for the rotated deflection pair,
//!    one otherwise).
//! 3. The axis settle time is awaited before returning.
//!
//! A `ControlError::Timeout` from the instrument is logged and reported as
//! `CommandOutcome::TimedOut`; it is not retried and skips the settle delay.
//! Any other control error propagates as a fault.
//!
//! [`SafeActuator::restore`] follows the same steps but writes the raw channel
//! readings of a [`Baseline`] instead of rotating a logical setpoint, so the
//! channels end up exactly where they were read.

use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{AppResult, ControlError, SweepError};
use crate::hardware::axis::{AxisChannels, Baseline, ControlAxis, Setpoint};
use crate::hardware::capabilities::InstrumentControl;

/// Result of a single `command` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Sent and settled.
    Applied,
    /// Outside the hard bound; nothing was sent.
    Rejected,
    /// The instrument did not confirm a set call.
    TimedOut,
}

/// Validates and commands control axes.
pub struct SafeActuator<C> {
    instrument: Arc<C>,
}

impl<C: InstrumentControl> SafeActuator<C> {
    /// Wrap an instrument-control handle.
    pub fn new(instrument: Arc<C>) -> Self {
        Self { instrument }
    }

    /// Read the current value of every channel of `axis`.
    pub async fn read_baseline(&self, axis: &ControlAxis) -> AppResult<Baseline> {
        let mut values = Vec::with_capacity(axis.components());
        for control in axis.control_names() {
            values.push(self.instrument.get_control_output(control).await?);
        }
        let readings = Setpoint::from_values(&values).ok_or_else(|| SweepError::SetpointArity {
            axis: axis.name.clone(),
            expected: axis.components(),
            actual: values.len(),
        })?;
        Ok(axis.baseline_from_readings(readings))
    }

    /// Command `axis` to the logical `setpoint`, settling for the axis settle
    /// time.
    pub async fn command(&self, axis: &ControlAxis, setpoint: Setpoint) -> AppResult<CommandOutcome> {
        check_arity(axis, setpoint)?;
        self.drive(axis, setpoint, physical_values(axis, setpoint))
            .await
    }

    /// Write the raw readings of `baseline` back to the channels of `axis`.
    pub async fn restore(&self, axis: &ControlAxis, baseline: Baseline) -> AppResult<CommandOutcome> {
        check_arity(axis, baseline.logical)?;
        check_arity(axis, baseline.readings)?;
        let writes = axis
            .control_names()
            .into_iter()
            .zip(baseline.readings.values())
            .collect();
        self.drive(axis, baseline.logical, writes).await
    }

    async fn drive(
        &self,
        axis: &ControlAxis,
        logical: Setpoint,
        writes: Vec<(&str, f64)>,
    ) -> AppResult<CommandOutcome> {
        if !axis.within_bounds(&logical) {
            warn!(
                axis = %axis.name,
                setpoint = %logical,
                bounds = ?axis.hard_bounds,
                "Setpoint out of range, not commanded"
            );
            return Ok(CommandOutcome::Rejected);
        }

        for (control, value) in writes {
            match self.instrument.set_control_output(control, value).await {
                Ok(()) => debug!(control, value, "Control set"),
                Err(ControlError::Timeout { control }) => {
                    warn!(axis = %axis.name, %control, "Timed out setting control, continuing");
                    return Ok(CommandOutcome::TimedOut);
                }
                Err(err) => return Err(err.into()),
            }
        }

        sleep(axis.settle_time).await;
        Ok(CommandOutcome::Applied)
    }
}

fn check_arity(axis: &ControlAxis, setpoint: Setpoint) -> AppResult<()> {
    if setpoint.components() != axis.components() {
        return Err(SweepError::SetpointArity {
            axis: axis.name.clone(),
            expected: axis.components(),
            actual: setpoint.components(),
        });
    }
    Ok(())
}

fn physical_values(axis: &ControlAxis, setpoint: Setpoint) -> Vec<(&str, f64)> {
    match (&axis.channels, setpoint) {
        (AxisChannels::Single { control }, Setpoint::Scalar(v)) => vec![(control.as_str(), v)],
        (
            AxisChannels::RotatedPair {
                control_a,
                control_b,
                rotation,
            },
            Setpoint::Pair(da, db),
        ) => {
            let (x, y) = rotation.to_physical(da, db);
            vec![(control_a.as_str(), x), (control_b.as_str(), y)]
        }
        // arity is checked by the caller
        _ => Vec::new(),
    }
}
