//! Host Capabilities
//!
//! The controller talks to the host platform through three small capability
//! traits instead of a monolithic instrument object:
//!
//! - [`InstrumentControl`] - read and set named control outputs
//! - [`DetectorSource`] - a live detector that yields frames
//! - [`CancellationSignal`] - an externally owned, polled cancel flag
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is thread-safe (requires Send + Sync)
//! - Is async where the host call may block on hardware (uses #[async_trait])
//! - Focuses on ONE thing
//!
//! How a control is physically actuated, or how a camera driver fills its
//! buffers, stays behind these traits.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Autostem { /* vendor handle */ }
//!
//! #[async_trait]
//! impl InstrumentControl for Autostem {
//!     async fn get_control_output(&self, name: &str) -> Result<f64, ControlError> {
//!         self.read(name).await
//!     }
//!
//!     async fn set_control_output(&self, name: &str, value: f64) -> Result<(), ControlError> {
//!         self.write(name, value).await
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::data::frame::{Frame, Sample};
use crate::error::ControlError;

/// Capability: Instrument Control Outputs
///
/// # Contract
/// - Values are in the control's native unit
/// - `set_control_output` returns once the instrument confirms the value, or
///   `ControlError::Timeout` if it does not
#[async_trait]
pub trait InstrumentControl: Send + Sync {
    /// Read back the current value of control `name`.
    async fn get_control_output(&self, name: &str) -> Result<f64, ControlError>;

    /// Command control `name` to `value`.
    async fn set_control_output(&self, name: &str, value: f64) -> Result<(), ControlError>;
}

/// Capability: Live Detector Source
///
/// # Contract
/// - `is_playing` reflects shared hardware state; something else may have
///   started the source already
/// - `grab_next_to_start` blocks until a frame that started after the call
///   is available. No timeout is applied by callers.
#[async_trait]
pub trait DetectorSource: Send + Sync {
    /// Sample type of the frames this source delivers.
    type Sample: Sample;

    /// Host identifier of the source (e.g. "eels_camera").
    fn source_id(&self) -> &str;

    /// Whether the source is currently acquiring.
    async fn is_playing(&self) -> bool;

    /// Start live acquisition.
    async fn start_playing(&self) -> Result<()>;

    /// Block until the next fresh frame and return it.
    async fn grab_next_to_start(&self) -> Result<Frame<Self::Sample>>;
}

/// Capability: Cooperative Cancellation
///
/// Polled once per innermost sweep iteration. The controller never resets it.
pub trait CancellationSignal: Send + Sync {
    /// Whether the user asked to stop.
    fn is_cancelled(&self) -> bool;
}

impl CancellationSignal for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// A signal that never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancelled;

impl CancellationSignal for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}
