//! Perfect Map - build-time perfect-hash lookup functions for C
//!
//! Perfect Map turns a fixed set of byte-string keys, each mapped to one or
//! more payload values, into a single allocation-free C lookup function. The
//! hash itself comes from an external minimal-perfect-hash solver (gperf);
//! this crate drives the solver, analyses its generated code, recovers key
//! lengths embedded in the key bytes and reassembles a function that takes
//! nothing but a buffer pointer.
//!
//! The generated functions are exact on trained keys and probabilistic on
//! everything else: an untrained buffer usually yields the no-match value but
//! may collide with a trained key.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Generation pipeline
pub mod map;

// Header generators built on the pipeline
pub mod consumers;

// Re-export commonly used items for convenience
pub use core::{Config, Error, Result};
pub use map::{
    generate, FunctionOptions, GeneratedMap, GperfSolver, Lookup, MapBuilder, Row, Solver,
    TrainingSet, Value,
};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
