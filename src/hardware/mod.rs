//! Hardware-facing layer: capability traits, axis descriptors, safe actuation,
//! frame grabbing and simulated devices.

pub mod actuator;
pub mod axis;
pub mod capabilities;
pub mod grabber;
pub mod mock;

pub use actuator::{CommandOutcome, SafeActuator};
pub use axis::{AxisChannels, Baseline, ControlAxis, DeflectionRotation, Setpoint};
pub use capabilities::{CancellationSignal, DetectorSource, InstrumentControl, NeverCancelled};
pub use grabber::FrameGrabber;
