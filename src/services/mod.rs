//! Services
//!
//! Business logic of the engine.

pub mod plan_mode;
