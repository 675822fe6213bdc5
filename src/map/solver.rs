//! External perfect-hash solver adapter.
//!
//! The rest of the pipeline only sees the [`Solver`] trait, so any program or
//! library that can produce a [`SolverResult`] for a training set can stand in
//! for gperf.

use crate::core::config::SolverConfig;
use crate::core::error::{Result, SolverError};
use crate::map::input::{c_escape, TrainingSet};
use crate::map::parser::{self, SolverResult};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// Classifies a training set into hash buckets.
pub trait Solver {
    /// Run the solver over every key of `set`
    fn solve(&self, set: &TrainingSet) -> Result<SolverResult>;
}

impl<F> Solver for F
where
    F: Fn(&TrainingSet) -> Result<SolverResult>,
{
    fn solve(&self, set: &TrainingSet) -> Result<SolverResult> {
        self(set)
    }
}

/// Flags every run passes regardless of configuration.
const FIXED_FLAGS: &[&str] = &[
    "--language=ANSI-C",
    "--compare-lengths",
    "--readonly-tables",
    "--global-table",
    "--struct-type",
    "--omit-struct-type",
    "--null-strings",
    "--compare-strncmp",
    "--no-strlen",
];

/// Runs gperf as a subprocess.
#[derive(Debug, Clone)]
pub struct GperfSolver {
    config: SolverConfig,
}

impl GperfSolver {
    /// Create an adapter for the configured program
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for one run
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![format!(
            "--multiple-iterations={}",
            self.config.iterations
        )];
        if self.config.randomize {
            args.push("--random".to_string());
        }
        args.push(format!("--size-multiple={}", self.config.size_multiple));
        args.extend(FIXED_FLAGS.iter().map(|f| f.to_string()));
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Write `input` to the solver and collect its generated code.
    ///
    /// The child is always reaped before returning, including when writing
    /// its input fails.
    pub fn invoke(&self, input: &str) -> std::result::Result<String, SolverError> {
        let program = &self.config.program;
        let args = self.args();
        debug!(program = %program, args = ?args, "Invoking solver");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SolverError::Spawn {
                program: program.clone(),
                source,
            })?;

        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(input.as_bytes()),
            None => Ok(()),
        };
        if let Err(e) = written {
            // A solver that exits early closes its stdin; its stderr says why.
            let output = child.wait_with_output()?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                return Err(SolverError::Diagnostic(stderr.trim().to_string()));
            }
            return Err(SolverError::Io(e));
        }

        let output = child.wait_with_output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return Err(SolverError::Diagnostic(stderr.trim().to_string()));
        }
        if !output.status.success() {
            return Err(SolverError::Exit(output.status));
        }

        debug!(bytes = output.stdout.len(), "Solver finished");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GperfSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl Solver for GperfSolver {
    fn solve(&self, set: &TrainingSet) -> Result<SolverResult> {
        let raw = self.invoke(&keyword_document(set))?;
        Ok(parser::parse(&raw)?)
    }
}

/// The solver's keyword-list document for `set`.
///
/// One line per row: the escaped key as a string literal followed by the
/// rendered payload values, comma separated.
pub fn keyword_document(set: &TrainingSet) -> String {
    let mut doc = String::from("%{\n\n%}\n\nstruct result_structure { const char *name; };\n%%\n");
    for row in set.rows() {
        doc.push('"');
        doc.push_str(&c_escape(row.key.as_bytes()));
        doc.push('"');
        for value in row.rendered_payload() {
            doc.push(',');
            doc.push_str(&value);
        }
        doc.push('\n');
    }
    doc.push_str("%%\n");
    doc
}
