//! Operator-facing acquisition session.
//!
//! A session owns the instrument handle, both detectors and the settings. For
//! each requested [`SweepVariant`] it asks the [`Operator`] to confirm the
//! detector setup, builds a fresh [`SweepController`] (so baselines are read
//! immediately before that sweep), runs it, and hands the stack to the sink.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::config::SweepSettings;
use crate::data::frame::Sample;
use crate::data::sink::DataSink;
use crate::error::{AppResult, SweepError};
use crate::experiment::controller::{SweepController, SweepOutcome, SweepState};
use crate::experiment::variants::{DetectorKind, SweepVariant};
use crate::hardware::capabilities::{CancellationSignal, DetectorSource, InstrumentControl};

/// Answers yes/no questions before a sweep touches the instrument.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Ask `prompt`; `Ok(true)` means go ahead.
    async fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Confirms everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

#[async_trait]
impl Operator for AutoConfirm {
    async fn confirm(&self, prompt: &str) -> Result<bool> {
        info!(prompt, "Auto-confirmed");
        Ok(true)
    }
}

/// Asks on stdin. Accepts `y`/`yes` (any case); anything else declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinOperator;

#[async_trait]
impl Operator for StdinOperator {
    async fn confirm(&self, prompt: &str) -> Result<bool> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(format!("{prompt} [y/N] ").as_bytes()).await?;
        stdout.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// What happened to one requested variant.
#[derive(Debug, Clone, Serialize)]
pub struct VariantReport {
    /// Variant requested
    pub variant: SweepVariant,
    /// Whether the operator confirmed it
    pub confirmed: bool,
    /// Sweep run id, if it ran
    pub run_uid: Option<String>,
    /// Traversal outcome, if it ran
    pub outcome: Option<SweepOutcome>,
    /// Frames planned
    pub planned_frames: usize,
    /// Frames acquired
    pub frames_acquired: usize,
    /// Setpoints skipped for exceeding a bound
    pub rejected_setpoints: usize,
    /// Set calls that timed out
    pub actuation_timeouts: usize,
    /// Fault message, if the traversal faulted
    pub fault: Option<String>,
    /// Whether every axis was restored to its baseline
    pub recovered: bool,
    /// Title the stack was published under
    pub published: Option<String>,
}

impl VariantReport {
    fn declined(variant: SweepVariant) -> Self {
        Self {
            variant,
            confirmed: false,
            run_uid: None,
            outcome: None,
            planned_frames: 0,
            frames_acquired: 0,
            rejected_setpoints: 0,
            actuation_timeouts: 0,
            fault: None,
            recovered: true,
            published: None,
        }
    }

    fn from_state<T: Sample>(variant: SweepVariant, state: &SweepState<T>) -> Self {
        Self {
            variant,
            confirmed: true,
            run_uid: Some(state.run_uid().to_string()),
            outcome: state.outcome(),
            planned_frames: state.planned_frames(),
            frames_acquired: state.frames_acquired(),
            rejected_setpoints: state.rejected_setpoints(),
            actuation_timeouts: state.actuation_timeouts(),
            fault: state.fault().map(str::to_string),
            recovered: state.recovery().iter().all(|r| r.restored()),
            published: None,
        }
    }
}

/// Runs confirmed variants against one instrument and two detectors.
pub struct AcquisitionSession<C, R, E> {
    instrument: Arc<C>,
    settings: SweepSettings,
    ronchigram: R,
    eels: E,
}

impl<C, R, E> AcquisitionSession<C, R, E>
where
    C: InstrumentControl,
    R: DetectorSource,
    E: DetectorSource,
{
    /// Create a session.
    pub fn new(instrument: Arc<C>, settings: SweepSettings, ronchigram: R, eels: E) -> Self {
        Self {
            instrument,
            settings,
            ronchigram,
            eels,
        }
    }

    /// Settings in use.
    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Ronchigram detector.
    pub fn ronchigram(&self) -> &R {
        &self.ronchigram
    }

    /// EELS detector.
    pub fn eels(&self) -> &E {
        &self.eels
    }

    /// Offer each of `variants` to `operator` and run the confirmed ones.
    ///
    /// Once `cancel` is raised no further variants are offered.
    ///
    /// # Errors
    /// Operator failures, baseline reads, planning and sink failures. A
    /// sweep that faults is reported, not returned as an error.
    pub async fn run<O, S>(
        &self,
        variants: &[SweepVariant],
        operator: &O,
        sink: &S,
        cancel: &dyn CancellationSignal,
    ) -> AppResult<Vec<VariantReport>>
    where
        O: Operator + ?Sized,
        S: DataSink<R::Sample> + DataSink<E::Sample>,
    {
        info!(
            source = self.ronchigram.source_id(),
            playing = self.ronchigram.is_playing().await,
            "Ronchigram detector"
        );
        info!(
            source = self.eels.source_id(),
            playing = self.eels.is_playing().await,
            "EELS detector"
        );

        let mut reports = Vec::with_capacity(variants.len());
        for &variant in variants {
            if cancel.is_cancelled() {
                warn!(%variant, "Cancellation raised; not offering remaining variants");
                break;
            }

            let confirmed = operator
                .confirm(variant.prompt())
                .await
                .map_err(|e| SweepError::Operator(e.to_string()))?;
            if !confirmed {
                info!(%variant, "Declined by operator");
                reports.push(VariantReport::declined(variant));
                continue;
            }

            let report = match variant.detector() {
                DetectorKind::Ronchigram => {
                    self.sweep_with(variant, &self.ronchigram, sink, cancel)
                        .await?
                }
                DetectorKind::Eels => self.sweep_with(variant, &self.eels, sink, cancel).await?,
            };
            reports.push(report);
        }
        Ok(reports)
    }

    async fn sweep_with<D, S>(
        &self,
        variant: SweepVariant,
        detector: &D,
        sink: &S,
        cancel: &dyn CancellationSignal,
    ) -> AppResult<VariantReport>
    where
        D: DetectorSource,
        S: DataSink<D::Sample> + ?Sized,
    {
        let axes = variant
            .axis_names()
            .iter()
            .map(|name| {
                self.settings
                    .axis(name)
                    .ok_or_else(|| SweepError::UnknownAxis((*name).to_string()))
            })
            .collect::<AppResult<Vec<_>>>()?;

        let controller =
            SweepController::new(self.instrument.clone(), axes, self.settings.sweep.cancel_scope)
                .await?;
        let plan = controller.plan(&variant.requests())?;

        info!(%variant, source = detector.source_id(), "Running variant");
        let state = controller.run(&plan, detector, cancel).await;
        let mut report = VariantReport::from_state(variant, &state);

        match state.into_stack() {
            Some(stack) => {
                sink.publish(variant.title(), stack)
                    .await
                    .map_err(|e| SweepError::Sink(e.to_string()))?;
                report.published = Some(variant.title().to_string());
            }
            None => warn!(%variant, "No frames acquired; nothing published"),
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sink::MemorySink;
    use crate::hardware::capabilities::NeverCancelled;
    use crate::hardware::mock::{MockDetector, MockInstrument};
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    struct Scripted {
        answers: Mutex<Vec<bool>>,
        asked: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: &[bool]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().rev().copied().collect()),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Operator for Scripted {
        async fn confirm(&self, prompt: &str) -> Result<bool> {
            self.asked.lock().unwrap().push(prompt.to_string());
            Ok(self.answers.lock().unwrap().pop().unwrap_or(false))
        }
    }

    fn session() -> (
        Arc<MockInstrument>,
        AcquisitionSession<MockInstrument, MockDetector, MockDetector>,
    ) {
        let instrument = Arc::new(MockInstrument::new());
        for control in ["CapPure.a", "CapPure.b", "DriftTubeVolts", "C10"] {
            instrument.preset(control, 0.0);
        }
        let session = AcquisitionSession::new(
            instrument.clone(),
            SweepSettings::default(),
            MockDetector::new("autotuning_camera", 2, 2),
            MockDetector::new("eels_camera", 1, 4),
        );
        (instrument, session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_variant_is_skipped() {
        let (instrument, session) = session();
        let operator = Scripted::new(&[false, true]);
        let sink = MemorySink::new();

        let reports = session
            .run(
                &[SweepVariant::DeflectionRonchigram, SweepVariant::DefocusEels],
                &operator,
                &sink,
                &NeverCancelled,
            )
            .await
            .unwrap();

        assert!(!reports[0].confirmed);
        assert_eq!(reports[1].frames_acquired, 11);
        assert_eq!(sink.titles().await, vec!["EELS_data_thru_focal"]);
        assert!(instrument.set_calls_for("CapPure.a").is_empty());
        assert_eq!(session.ronchigram().start_count(), 0);
        assert_eq!(operator.asked.lock().unwrap()[0], "Is the detector mode in CCD?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ronchigram_variant_uses_ronchigram_detector() {
        let (_, session) = session();
        let sink = MemorySink::new();

        let reports = session
            .run(
                &[SweepVariant::DeflectionRonchigram],
                &AutoConfirm,
                &sink,
                &NeverCancelled,
            )
            .await
            .unwrap();

        assert_eq!(reports[0].published.as_deref(), Some("Ronchi_data"));
        assert_eq!(session.ronchigram().frames_delivered(), 49);
        assert_eq!(session.eels().frames_delivered(), 0);
        let items = sink.take().await;
        assert_eq!(items[0].1.shape(), (2, 2, 49));
    }

    #[tokio::test(start_paused = true)]
    async fn test_raised_cancel_stops_offering_variants() {
        let (_, session) = session();
        let operator = Scripted::new(&[true, true]);
        let sink = MemorySink::new();
        let cancel = AtomicBool::new(true);

        let reports = session
            .run(&SweepVariant::ALL, &operator, &sink, &cancel)
            .await
            .unwrap();

        assert!(reports.is_empty());
        assert!(operator.asked.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_baseline_is_an_error() {
        let instrument = Arc::new(MockInstrument::new());
        let session = AcquisitionSession::new(
            instrument,
            SweepSettings::default(),
            MockDetector::new("autotuning_camera", 1, 1),
            MockDetector::new("eels_camera", 1, 1),
        );
        let sink = MemorySink::new();

        let result = session
            .run(&[SweepVariant::DefocusEels], &AutoConfirm, &sink, &NeverCancelled)
            .await;

        assert!(result.is_err());
        assert!(sink.titles().await.is_empty());
    }
}
