//! Error types and handling for the perfect-map generator
//!
//! Every stage of a generation run fails fast: a partially generated lookup
//! function would silently misbehave in the consuming program, so each error
//! aborts the whole run and nothing is emitted.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the generator
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or inconsistent training input
    #[error("Invalid row: {0}")]
    InvalidRow(#[from] InvalidRowError),

    /// The external hash solver failed or complained
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    /// The solver's output lacked an expected section
    #[error("Solver output parse error: {0}")]
    Parse(#[from] ParseError),

    /// No byte position in the keys encodes their length
    #[error("{0}")]
    LengthNotInferable(#[from] LengthNotInferableError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unusable driver input (map spec files, scanned headers)
    #[error("Input error: {0}")]
    Input(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Training-set validation errors, raised before the solver is invoked
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRowError {
    /// A key with no payload values
    #[error("row {key} has no payload (need a key and at least one value)")]
    MissingPayload {
        /// Escaped key of the offending row
        key: String,
    },

    /// Payload arity differs from the first row
    #[error("row {key} has {actual} payload values, expected {expected}")]
    ArityMismatch {
        /// Escaped key of the offending row
        key: String,
        /// Arity established by the first row
        expected: usize,
        /// Arity of the offending row
        actual: usize,
    },

    /// A payload column changes kind between rows
    #[error("row {key} column {column} is {actual}, expected {expected}")]
    KindMismatch {
        /// Escaped key of the offending row
        key: String,
        /// Zero-based payload column
        column: usize,
        /// Kind established by the first row
        expected: &'static str,
        /// Kind found in the offending row
        actual: &'static str,
    },

    /// Two rows share a key
    #[error("duplicate key {key}")]
    DuplicateKey {
        /// Escaped key that appeared twice
        key: String,
    },

    /// Nothing to generate from
    #[error("training set is empty")]
    Empty,

    /// The first row's payload does not imply a C return type
    #[error("cannot determine return type from a {kind} payload; set an explicit output ctype")]
    UnknownOutputType {
        /// Kind of the single payload column
        kind: &'static str,
    },
}

/// Failures of the solver subprocess
#[derive(Error, Debug)]
pub enum SolverError {
    /// The solver program could not be started
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// Program that was invoked
        program: String,
        /// Underlying spawn failure
        #[source]
        source: std::io::Error,
    },

    /// Writing the keyword list or draining the output failed
    #[error("solver I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The solver wrote diagnostics to stderr
    #[error("solver reported: {0}")]
    Diagnostic(String),

    /// The solver exited unsuccessfully without diagnostics
    #[error("solver exited with {0}")]
    Exit(std::process::ExitStatus),
}

/// Structural extraction failures; these signal a solver version mismatch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A required section is absent
    #[error("missing section: {0}")]
    MissingSection(&'static str),

    /// A section is present but unreadable
    #[error("malformed {section}: {detail}")]
    Malformed {
        /// Section name
        section: &'static str,
        /// What was wrong with it
        detail: String,
    },

    /// Sections disagree with each other or with the training set
    #[error("inconsistent solver output: {0}")]
    Inconsistent(String),
}

/// The hash depends on key length but no byte encodes it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "hash depends on key length but no byte offset in 0..{scanned} encodes it \
     consistently across {samples} keys; an explicit length parameter would be required"
)]
pub struct LengthNotInferableError {
    /// Number of trained keys examined
    pub samples: usize,
    /// Exclusive upper bound of the offsets scanned
    pub scanned: usize,
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an input error
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Check if the failure is attributable to the caller's input
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRow(_)
                | Error::LengthNotInferable(_)
                | Error::Config(_)
                | Error::Input(_)
        )
    }
}
