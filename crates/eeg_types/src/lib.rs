//! Shared types for the band power system
//!
//! This crate contains the value types that cross the engine boundary:
//! configuration, sample batches, published snapshots and calibration
//! baselines. Everything here is plain data and serde-serializable.

pub mod config;
pub mod data;
pub mod event;

// Re-export commonly used types
pub use config::*;
pub use data::*;
pub use event::*;
