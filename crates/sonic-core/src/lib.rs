//! # Sonic-Core
//!
//! Core types and utilities for the Sonic Sense pipeline, which turns the
//! distance stream of an ultrasonic ranging front-end into a smoothed
//! distance, a hand-gesture label and a breathing-rate estimate.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
