//! Utilities
//!
//! Common utilities used throughout the engine.

pub mod error;

pub use error::*;
