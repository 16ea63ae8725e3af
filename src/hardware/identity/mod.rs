//! Drive Identity Module
//!
//! Resolves stable ids and serial numbers for drives.

pub mod resolver;

pub use resolver::*;
