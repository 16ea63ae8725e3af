//! Watchdog Module
//!
//! The reactor loop and what surrounds it:
//! - Configuration
//! - Status events and their wire shapes
//! - Event emission to the message bus

pub mod config;
pub mod emitter;
pub mod events;
pub mod reactor;

pub use config::*;
pub use emitter::*;
pub use events::*;
pub use reactor::*;
