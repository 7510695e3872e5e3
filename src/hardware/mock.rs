//! Mock Hardware Implementations
//!
//! Provides simulated instrument and detector collaborators for testing and
//! for running sweeps without a microscope attached.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockInstrument` - In-memory control outputs with scripted timeouts/faults
//! - `MockDetector` - Simulated camera delivering numbered `u16` frames
//!
//! # Frame Content
//!
//! Every pixel of the N-th delivered frame (1-based) holds `N`, so a test can
//! tell which grab ended up in which stack slot.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::data::frame::Frame;
use crate::error::ControlError;
use crate::hardware::capabilities::{DetectorSource, InstrumentControl};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// MockInstrument - Simulated Control Backend
// =============================================================================

/// Mock instrument with in-memory control outputs
///
/// Simulates the host's instrument controller:
/// - Reads return the last value set (or preset)
/// - Every set call is recorded in order
/// - Individual controls can be scripted to time out or fail
///
/// # Example
///
/// ```rust,ignore
/// let instrument = MockInstrument::new();
/// instrument.preset("C10", 1e-7);
/// assert_eq!(instrument.get_control_output("C10").await?, 1e-7);
/// ```
#[derive(Debug, Default)]
pub struct MockInstrument {
    values: Mutex<HashMap<String, f64>>,
    set_calls: Mutex<Vec<(String, f64)>>,
    timeouts: Mutex<HashSet<String>>,
    failures: Mutex<HashSet<String>>,
}

impl MockInstrument {
    /// Create an instrument with no known controls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a control value without recording it as a set call.
    pub fn preset(&self, control: &str, value: f64) {
        lock(&self.values).insert(control.to_string(), value);
    }

    /// Current value of `control`.
    pub fn value(&self, control: &str) -> Option<f64> {
        lock(&self.values).get(control).copied()
    }

    /// Every set call so far, in order.
    pub fn set_calls(&self) -> Vec<(String, f64)> {
        lock(&self.set_calls).clone()
    }

    /// Set calls addressed to `control`, in order.
    pub fn set_calls_for(&self, control: &str) -> Vec<f64> {
        lock(&self.set_calls)
            .iter()
            .filter(|(name, _)| name == control)
            .map(|(_, value)| *value)
            .collect()
    }

    /// Make every set call on `control` time out.
    pub fn time_out_on(&self, control: &str) {
        lock(&self.timeouts).insert(control.to_string());
    }

    /// Make every set call on `control` fail with a backend error.
    pub fn fail_on(&self, control: &str) {
        lock(&self.failures).insert(control.to_string());
    }

    /// Stop failing set calls on `control`.
    pub fn clear_faults(&self, control: &str) {
        lock(&self.timeouts).remove(control);
        lock(&self.failures).remove(control);
    }
}

#[async_trait]
impl InstrumentControl for MockInstrument {
    async fn get_control_output(&self, name: &str) -> Result<f64, ControlError> {
        self.value(name)
            .ok_or_else(|| ControlError::UnknownControl(name.to_string()))
    }

    async fn set_control_output(&self, name: &str, value: f64) -> Result<(), ControlError> {
        lock(&self.set_calls).push((name.to_string(), value));

        if lock(&self.timeouts).contains(name) {
            return Err(ControlError::Timeout {
                control: name.to_string(),
            });
        }
        if lock(&self.failures).contains(name) {
            return Err(ControlError::Backend(anyhow::anyhow!(
                "MockInstrument: '{}' refused value {}",
                name,
                value
            )));
        }

        debug!("MockInstrument: {} <- {:e}", name, value);
        lock(&self.values).insert(name.to_string(), value);
        Ok(())
    }
}

// =============================================================================
// MockDetector - Simulated Camera
// =============================================================================

/// Mock detector source delivering numbered frames
///
/// Simulates a live camera with:
/// - Configurable frame shape
/// - Configurable readout time (default 0ms)
/// - Shared `is_playing` state with start counting
/// - Scripted grab failure, shape change and cancellation
pub struct MockDetector {
    source_id: String,
    shape: (usize, usize),
    readout: Duration,
    playing: AtomicBool,
    starts: AtomicUsize,
    delivered: AtomicUsize,
    fail_on_grab: Mutex<Option<usize>>,
    reshape: Mutex<Option<(usize, (usize, usize))>>,
    cancel_after: Mutex<Option<(usize, Arc<AtomicBool>)>>,
}

impl MockDetector {
    /// Create an idle detector delivering `rows × cols` frames.
    pub fn new(source_id: &str, rows: usize, cols: usize) -> Self {
        Self {
            source_id: source_id.to_string(),
            shape: (rows, cols),
            readout: Duration::ZERO,
            playing: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            fail_on_grab: Mutex::new(None),
            reshape: Mutex::new(None),
            cancel_after: Mutex::new(None),
        }
    }

    /// Simulate a readout delay per frame.
    pub fn with_readout(mut self, readout: Duration) -> Self {
        self.readout = readout;
        self
    }

    /// Number of times `start_playing` was called.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of frames delivered.
    pub fn frames_delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Fail the `n`-th grab (1-based).
    pub fn fail_on_grab(&self, n: usize) {
        *lock(&self.fail_on_grab) = Some(n);
    }

    /// From the `n`-th grab on (1-based), deliver frames of `shape`.
    pub fn change_shape_at(&self, n: usize, shape: (usize, usize)) {
        *lock(&self.reshape) = Some((n, shape));
    }

    /// Raise `flag` once `n` frames have been delivered.
    pub fn cancel_after(&self, n: usize, flag: Arc<AtomicBool>) {
        *lock(&self.cancel_after) = Some((n, flag));
    }
}

#[async_trait]
impl DetectorSource for MockDetector {
    type Sample = u16;

    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    async fn start_playing(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
        debug!("MockDetector {}: playing", self.source_id);
        Ok(())
    }

    async fn grab_next_to_start(&self) -> Result<Frame<u16>> {
        if !self.playing.load(Ordering::SeqCst) {
            anyhow::bail!("MockDetector {}: not playing", self.source_id);
        }

        let n = self.delivered.load(Ordering::SeqCst) + 1;
        let fail_here = *lock(&self.fail_on_grab) == Some(n);
        if fail_here {
            anyhow::bail!("MockDetector {}: readout failed on frame {}", self.source_id, n);
        }

        sleep(self.readout).await;

        let reshape = *lock(&self.reshape);
        let (rows, cols) = match reshape {
            Some((from, shape)) if n >= from => shape,
            _ => self.shape,
        };
        let value = u16::try_from(n).unwrap_or(u16::MAX);
        self.delivered.store(n, Ordering::SeqCst);

        if let Some((after, flag)) = lock(&self.cancel_after).as_ref() {
            if n >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }

        Ok(Frame::filled(rows, cols, value))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
