//! Return-to-baseline on sweep exit.
//!
//! A [`RecoveryGuard`] is armed before the first coordinate is commanded and
//! must be consumed with [`RecoveryGuard::restore`] once the traversal ends,
//! whichever way it ended. Restoring goes through `SafeActuator::restore`,
//! which writes back the raw channel readings taken at construction: the
//! bound check applies and each axis settles for its own settle time.
//!
//! Dropping an armed guard without restoring (the sweep future was dropped
//! mid-flight) cannot await the instrument; it logs the axes that were left
//! away from their baselines instead.

use tracing::{error, info, warn};

use crate::hardware::actuator::{CommandOutcome, SafeActuator};
use crate::hardware::axis::{Baseline, ControlAxis};
use crate::hardware::capabilities::InstrumentControl;

/// What happened when one axis was sent back to its baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRecord {
    /// Axis name
    pub axis: String,
    /// Baseline commanded
    pub baseline: Baseline,
    /// Command outcome, or the error rendered if the command failed
    pub outcome: Result<CommandOutcome, String>,
}

impl RecoveryRecord {
    /// Whether the baseline was applied.
    pub fn restored(&self) -> bool {
        matches!(self.outcome, Ok(CommandOutcome::Applied))
    }
}

/// Guarantees swept axes are re-commanded to their baselines.
#[must_use = "an armed recovery guard must be restored"]
pub struct RecoveryGuard<'a> {
    targets: Vec<(&'a ControlAxis, Baseline)>,
    armed: bool,
}

impl<'a> RecoveryGuard<'a> {
    /// Arm recovery for `targets`, given outermost axis first. Restoration
    /// runs innermost axis first.
    pub fn arm(targets: Vec<(&'a ControlAxis, Baseline)>) -> Self {
        Self {
            targets,
            armed: true,
        }
    }

    /// Command every target back to its baseline.
    ///
    /// Failures on one axis are logged and do not stop the others.
    pub async fn restore<C: InstrumentControl>(
        mut self,
        actuator: &SafeActuator<C>,
    ) -> Vec<RecoveryRecord> {
        self.armed = false;
        let mut records = Vec::with_capacity(self.targets.len());

        for (axis, baseline) in self.targets.iter().rev() {
            info!(axis = %axis.name, baseline = %baseline, "Returning to start position");
            let outcome = match actuator.restore(axis, *baseline).await {
                Ok(outcome) => {
                    if outcome != CommandOutcome::Applied {
                        warn!(axis = %axis.name, ?outcome, "Baseline not applied");
                    }
                    Ok(outcome)
                }
                Err(err) => {
                    error!(axis = %axis.name, error = %err, "Failed to restore baseline");
                    Err(err.to_string())
                }
            };
            records.push(RecoveryRecord {
                axis: axis.name.clone(),
                baseline: *baseline,
                outcome,
            });
        }
        records
    }
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let axes: Vec<&str> = self.targets.iter().map(|(a, _)| a.name.as_str()).collect();
            error!(
                ?axes,
                "Sweep abandoned before recovery; axes may be away from baseline"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::grid::GridSpec;
    use crate::hardware::axis::Setpoint;
    use crate::hardware::mock::MockInstrument;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn axis(name: &str, control: &str, bound: f64) -> ControlAxis {
        ControlAxis::scalar(
            name,
            "V",
            control,
            bound,
            Duration::from_secs(1),
            GridSpec::new(0.1, 0.2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_runs_innermost_first() {
        let instrument = Arc::new(MockInstrument::new());
        let actuator = SafeActuator::new(instrument.clone());
        let outer = axis("energy", "DriftTubeVolts", 2.0);
        let inner = axis("defocus", "C10", 1.0);

        let guard = RecoveryGuard::arm(vec![
            (&outer, outer.baseline_from_readings(Setpoint::Scalar(0.3))),
            (&inner, inner.baseline_from_readings(Setpoint::Scalar(0.0))),
        ]);
        let records = guard.restore(&actuator).await;

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(RecoveryRecord::restored));
        let calls = instrument.set_calls();
        assert_eq!(calls[0], ("C10".to_string(), 0.0));
        assert_eq!(calls[1], ("DriftTubeVolts".to_string(), 0.3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_continues_past_failure() {
        let instrument = Arc::new(MockInstrument::new());
        instrument.fail_on("C10");
        let actuator = SafeActuator::new(instrument.clone());
        let outer = axis("energy", "DriftTubeVolts", 2.0);
        let inner = axis("defocus", "C10", 1.0);

        let records = RecoveryGuard::arm(vec![
            (&outer, outer.baseline_from_readings(Setpoint::Scalar(0.1))),
            (&inner, inner.baseline_from_readings(Setpoint::Scalar(0.0))),
        ])
        .restore(&actuator)
        .await;

        assert!(records[0].outcome.is_err());
        assert!(records[1].restored());
        assert_eq!(instrument.value("DriftTubeVolts"), Some(0.1));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_dropping_armed_guard_logs() {
        let energy = axis("energy", "DriftTubeVolts", 2.0);
        let baseline = energy.baseline_from_readings(Setpoint::Scalar(0.0));
        drop(RecoveryGuard::arm(vec![(&energy, baseline)]));
        assert!(logs_contain("abandoned before recovery"));
    }
}
