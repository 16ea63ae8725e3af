//! Service Monitoring Module
//!
//! Tracks the lifecycle of the configured host services.

pub mod tracker;

pub use tracker::*;
