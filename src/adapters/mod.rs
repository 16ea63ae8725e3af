//! Adapters
//!
//! Implementations of the domain ports:
//! - Scripted event source (dry runs, scenario tests)
//! - Message buses (channel, log)

pub mod bus;
pub mod scripted;

pub use bus::*;
pub use scripted::*;
