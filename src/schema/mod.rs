//! Unified mine.raw_sample.v1 schema
//!
//! This module defines the driver-agnostic input envelope for sensor samples.
//! Sample-source collaborators (SDR, magnetometer, thermal camera, flow
//! monitor) emit one envelope per reading.

mod adapter;
mod raw_sample;

pub use adapter::*;
pub use raw_sample::*;
