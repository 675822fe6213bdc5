//! Core system foundations
//!
//! Error handling, configuration and logging shared by the generator and
//! its drivers.

pub mod error;
pub mod config;
pub mod logging;

// Re-export commonly used items
pub use error::{
    Error, InvalidRowError, LengthNotInferableError, ParseError, Result, SolverError,
};
pub use config::Config;
