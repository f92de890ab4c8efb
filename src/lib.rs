//! Frame Pacer Library
//!
//! Drift-corrected frame pacing for fixed-size hardware audio sinks.

pub mod audio;
pub mod engine;
