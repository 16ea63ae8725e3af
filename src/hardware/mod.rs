//! Hardware Module
//!
//! Provides drive identity resolution, the drive registry, and self-test
//! correlation for the watchdog.

pub mod identity;
pub mod registry;
pub mod selftest;

pub use identity::*;
pub use registry::*;
pub use selftest::*;
