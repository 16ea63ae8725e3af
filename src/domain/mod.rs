//! Domain layer - Core port definitions
//!
//! This module defines the traits (ports) that the event source and message
//! bus adapters implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
