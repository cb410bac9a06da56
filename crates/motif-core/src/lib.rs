//! # motif-core
//!
//! Core types, traits, and abstractions for the motif bulk-transformation
//! orchestration engine.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the store and engine crates depend on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
