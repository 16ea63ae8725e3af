//! Drive Registry Module
//!
//! In-memory drive inventory and identity cache, rebuilt from live
//! enumeration and kept current by add/remove/property-change events.

pub mod drive_registry;

pub use drive_registry::*;
