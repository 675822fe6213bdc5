//! Generators built on the lookup-function core
//!
//! Each driver turns some source of keys into training sets, runs the core
//! once per distinct set and splices the emitted functions into a header.

pub mod enum_maps;
pub mod enum_scan;
pub mod log_table;
pub mod map_spec;

pub use enum_maps::render_enum_maps;
pub use enum_scan::{scan, EnumDecl, EnumEntry};
pub use log_table::render_log_table;
pub use map_spec::MapSpec;

use std::collections::HashSet;

/// Include-guard macro for `name`: upper-cased, with every run of
/// non-alphabetic characters collapsed to one `_`.
pub fn include_guard(name: &str) -> String {
    let mut guard = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphabetic() {
            guard.push(c.to_ascii_uppercase());
            in_run = false;
        } else if !in_run {
            guard.push('_');
            in_run = true;
        }
    }
    guard
}

/// Names already generated during this run.
///
/// Passed explicitly through the drivers so the same table is never emitted
/// twice within one output.
#[derive(Debug, Default, Clone)]
pub struct EmittedNames(HashSet<String>);

impl EmittedNames {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name`; false if it was already emitted
    pub fn insert(&mut self, name: &str) -> bool {
        self.0.insert(name.to_string())
    }

    /// True if `name` was emitted
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Number of names emitted
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True before anything was emitted
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
