//! Frames, stacks and sinks.

pub mod frame;
pub mod sink;
pub mod stack;

pub use frame::{Frame, Sample};
pub use sink::{DataSink, LoggingSink, MemorySink};
pub use stack::{Stack, StackAssembler};
