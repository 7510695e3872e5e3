//! Sweep-and-acquire control for STEM aberration measurement.
//!
//! The crate drives instrument controls (beam deflection, drift-tube energy
//! offset, defocus) over symmetric grids around their current values, grabs
//! one detector frame per grid point into a preallocated stack, and always
//! returns the controls to where they started.
//!
//! Instrument and detector access go through the capability traits in
//! [`hardware::capabilities`]; simulated devices live in [`hardware::mock`].

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
