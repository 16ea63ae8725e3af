//! Drive Self-Test Module
//!
//! Correlates asynchronous self-test jobs with drives and normalizes their
//! results.

pub mod correlator;
pub mod normalizer;

pub use correlator::*;
pub use normalizer::*;
