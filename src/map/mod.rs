//! Lookup-function generation pipeline
//!
//! One run takes a validated [`TrainingSet`] through the solver, extracts the
//! hash description from its output, recovers the key length from the key
//! bytes when the hash needs it, and assembles a single C function. Any stage
//! failing aborts the run; nothing partial is ever returned.

pub mod assembler;
pub mod hash_eval;
pub mod input;
pub mod length;
pub mod parser;
pub mod solver;

pub use assembler::Header;
pub use input::{Key, KeyPart, OutputType, Row, TrainingSet, Value, ValueKind};
pub use length::LengthEncoding;
pub use parser::SolverResult;
pub use solver::{GperfSolver, Solver};

use crate::core::error::{InvalidRowError, ParseError, Result};
use assembler::FunctionParts;
use hash_eval::{HashInput, HashProgram};
use length::LengthSample;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Per-function overrides.
#[derive(Clone, Debug, Default)]
pub struct FunctionOptions {
    /// Return type instead of the one implied by the first row
    pub output_ctype: Option<String>,
    /// No-match value instead of the type's default sentinel
    pub nomatch: Option<String>,
    /// Documentation comment style
    pub header: Header,
}

/// Outcome of evaluating a buffer against a generated map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// The buffer hashed onto an occupied slot; its rendered payload
    Hit(&'a [String]),
    /// The function returns its no-match value
    NoMatch,
}

/// A generated lookup function and what it was built from.
#[derive(Debug, Clone)]
pub struct GeneratedMap {
    name: String,
    text: String,
    output: OutputType,
    sentinel: String,
    solved: SolverResult,
    slots: Vec<Option<Vec<String>>>,
    length: Option<LengthEncoding>,
    program: Option<HashProgram>,
}

impl GeneratedMap {
    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emitted C text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Emitted C text, by value
    pub fn into_text(self) -> String {
        self.text
    }

    /// Declared return type
    pub fn output_type(&self) -> &OutputType {
        &self.output
    }

    /// No-match value
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Length recovery injected into the function, if any
    pub fn length_encoding(&self) -> Option<LengthEncoding> {
        self.length
    }

    /// Parsed solver run the function was assembled from
    pub fn solver_result(&self) -> &SolverResult {
        &self.solved
    }

    /// True when every trained key was checked against the interpreted hash
    pub fn is_verified(&self) -> bool {
        self.program.is_some()
    }

    /// Evaluate what the generated function returns for `buf`.
    ///
    /// Mirrors the C code: the length comes from the length encoding, the
    /// hash is interpreted with the solver's weight table and out-of-range
    /// values miss. Bytes past the end of `buf` read as zero. Returns `None`
    /// when the hash calculation could not be interpreted.
    pub fn simulate(&self, buf: &[u8]) -> Option<Lookup<'_>> {
        let program = self.program.as_ref()?;
        let len = match self.length {
            Some(enc) => enc.decode(buf).unwrap_or(enc.bias) as u32,
            None => buf.len() as u32,
        };
        let input = HashInput {
            buffer: buf,
            len,
            asso: self.solved.asso_values.as_ref().map(|a| a.values.as_slice()),
        };

        let hit = program
            .eval(input)
            .filter(|h| *h <= self.solved.max_hash_value)
            .and_then(|h| self.slots.get(h as usize))
            .and_then(Option::as_ref);
        Some(match hit {
            Some(payload) => Lookup::Hit(payload),
            None => Lookup::NoMatch,
        })
    }

    fn verify(&self, set: &TrainingSet) -> std::result::Result<(), ParseError> {
        for row in set.rows() {
            let want = row.rendered_payload();
            match self.simulate(row.key.as_bytes()) {
                Some(Lookup::Hit(got)) if got == want.as_slice() => {}
                other => {
                    return Err(ParseError::Inconsistent(format!(
                        "trained key {} resolves to {:?} instead of {:?}",
                        row.key, other, want
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Generate the lookup function `name` for `set`.
pub fn generate<S>(
    name: &str,
    set: &TrainingSet,
    solver: &S,
    options: &FunctionOptions,
) -> Result<GeneratedMap>
where
    S: Solver + ?Sized,
{
    if set.is_empty() {
        return Err(InvalidRowError::Empty.into());
    }
    let output = match &options.output_ctype {
        Some(ctype) => OutputType::new(ctype.as_str()),
        None => set.output_type(name)?,
    };
    let prelude = if output.is_composite() {
        Some(assembler::struct_definition(name, &set.column_kinds())?)
    } else {
        None
    };
    let sentinel = options
        .nomatch
        .clone()
        .unwrap_or_else(|| output.default_sentinel());

    info!(map = %name, keys = set.len(), "Generating lookup function");
    let solved = solver.solve(set)?;
    debug!(
        keys = solved.total_keywords,
        min_len = solved.min_word_length,
        max_len = solved.max_word_length,
        max_hash = solved.max_hash_value,
        uses_len = solved.references_length(),
        "Parsed solver output"
    );
    if solved.duplicates > 0 {
        warn!(map = %name, duplicates = solved.duplicates, "Solver reported duplicate hash values");
    }

    let slots = match_slots(set, &solved)?;

    let length = if solved.references_length() {
        let samples: Vec<LengthSample<'_>> = set
            .rows()
            .iter()
            .map(|r| LengthSample::whole(r.key.as_bytes()))
            .collect();
        let encoding = length::infer(&samples)?;
        debug!(map = %name, length = %encoding, "Inferred key length encoding");
        Some(encoding)
    } else {
        None
    };

    let program = match HashProgram::parse(&solved.hash_calc) {
        Ok(program) => Some(program),
        Err(e) => {
            warn!(map = %name, error = %e, "Skipping self-verification");
            None
        }
    };

    let text = assembler::assemble(&FunctionParts {
        name,
        output: &output,
        sentinel: &sentinel,
        solved: &solved,
        slots: &slots,
        length,
        header: &options.header,
        prelude: prelude.as_deref(),
    });

    let map = GeneratedMap {
        name: name.to_string(),
        text,
        output,
        sentinel,
        solved,
        slots,
        length,
        program,
    };
    if map.is_verified() {
        map.verify(set)?;
    }
    Ok(map)
}

/// Pair each result slot with the trained row it holds.
fn match_slots(
    set: &TrainingSet,
    solved: &SolverResult,
) -> std::result::Result<Vec<Option<Vec<String>>>, ParseError> {
    if solved.total_keywords != set.len() {
        return Err(ParseError::Inconsistent(format!(
            "solver hashed {} keys, training set has {}",
            solved.total_keywords,
            set.len()
        )));
    }

    let mut seen = HashSet::new();
    let slots = solved
        .wordlist
        .iter()
        .map(|slot| {
            let Some(entry) = slot else {
                return Ok(None);
            };
            let key = parser::decode_c_string(&entry.key_literal).ok_or_else(|| {
                ParseError::Inconsistent(format!("undecodable key {}", entry.key_literal))
            })?;
            let row = set.get(&key).ok_or_else(|| {
                ParseError::Inconsistent(format!("untrained key {} in result table", entry.key_literal))
            })?;
            if !seen.insert(key) {
                return Err(ParseError::Inconsistent(format!(
                    "key {} occupies more than one slot",
                    row.key
                )));
            }
            let payload = row.rendered_payload();
            let echoed: Vec<String> = entry.payload.iter().map(|p| p.trim().to_string()).collect();
            if echoed != payload {
                return Err(ParseError::Inconsistent(format!(
                    "key {} carries {:?} in the result table, expected {:?}",
                    row.key, echoed, payload
                )));
            }
            Ok(Some(payload))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if seen.len() != set.len() {
        return Err(ParseError::Inconsistent(format!(
            "result table holds {} of {} trained keys",
            seen.len(),
            set.len()
        )));
    }
    Ok(slots)
}

/// Accumulates rows for one map and generates it.
#[derive(Debug, Clone)]
pub struct MapBuilder {
    name: String,
    options: FunctionOptions,
    set: TrainingSet,
}

impl MapBuilder {
    /// Start a map called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: FunctionOptions::default(),
            set: TrainingSet::new(),
        }
    }

    /// Replace the function options
    pub fn with_options(mut self, options: FunctionOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a row; rejected rows leave the builder unchanged
    pub fn push(&mut self, row: Row) -> std::result::Result<&mut Self, InvalidRowError> {
        self.set.push(row)?;
        Ok(self)
    }

    /// Rows accumulated so far
    pub fn training_set(&self) -> &TrainingSet {
        &self.set
    }

    /// Run the pipeline
    pub fn build<S: Solver + ?Sized>(&self, solver: &S) -> Result<GeneratedMap> {
        generate(&self.name, &self.set, solver, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::map::parser::tests::{sample_output, state_output, SampleOutput};
    use std::cell::Cell;

    fn canned(raw: String) -> impl Fn(&TrainingSet) -> Result<SolverResult> {
        move |_| Ok(parser::parse(&raw)?)
    }

    fn states() -> TrainingSet {
        TrainingSet::from_rows(vec![
            Row::new("RUNNING", vec![1.into()]),
            Row::new("STOPPED", vec![2.into()]),
            Row::new("ERROR", vec![3.into()]),
        ])
        .unwrap()
    }

    fn prefixed_output() -> String {
        let mut asso = vec![3u32; 256];
        for b in [b'A', b'C', b'F'] {
            asso[b as usize] = 0;
        }
        sample_output(SampleOutput {
            positions: "2",
            total: 3,
            min_len: 3,
            max_len: 5,
            min_hash: 3,
            max_hash: 5,
            asso: Some(&asso),
            calc: "  return len + asso_values[(unsigned char)str[1]];",
            wordlist: "    {(char*)0}, {(char*)0}, {(char*)0},\n    {\"\\002AB\",1}, {\"\\003CDE\",2}, {\"\\004FGHI\",3}",
        })
    }

    #[test]
    fn state_map_round_trip() {
        let map = generate("state_idx", &states(), &canned(state_output()), &FunctionOptions::default())
            .unwrap();

        assert!(map.is_verified());
        assert_eq!(map.sentinel(), "-1");
        assert_eq!(map.length_encoding(), None);
        assert!(map.text().contains("int state_idx(register const char *buf)"));
        assert!(map.text().contains("return -1;"));

        let one = vec!["1".to_string()];
        assert_eq!(map.simulate(b"RUNNING"), Some(Lookup::Hit(&one)));
        assert_eq!(map.simulate(b"UNKNOWN"), Some(Lookup::NoMatch));
    }

    #[test]
    fn empty_set_never_reaches_solver() {
        let calls = Cell::new(0);
        let solver = |_: &TrainingSet| -> Result<SolverResult> {
            calls.set(calls.get() + 1);
            Ok(parser::parse(&state_output())?)
        };
        let err = generate("m", &TrainingSet::new(), &solver, &FunctionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidRow(InvalidRowError::Empty)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn payload_disagreement_is_inconsistent() {
        let set = TrainingSet::from_rows(vec![
            Row::new("RUNNING", vec![5.into()]),
            Row::new("STOPPED", vec![2.into()]),
            Row::new("ERROR", vec![3.into()]),
        ])
        .unwrap();
        let err = generate("m", &set, &canned(state_output()), &FunctionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::Inconsistent(_))));
    }

    #[test]
    fn key_count_mismatch_is_inconsistent() {
        let set = TrainingSet::from_rows(vec![Row::new("RUNNING", vec![1.into()])]).unwrap();
        let err = generate("m", &set, &canned(state_output()), &FunctionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::Inconsistent(_))));
    }

    #[test]
    fn length_is_recovered_from_prefix() {
        let set = TrainingSet::from_rows(vec![
            Row::new([2u8, b'A', b'B'], vec![1.into()]),
            Row::new([3u8, b'C', b'D', b'E'], vec![2.into()]),
            Row::new([4u8, b'F', b'G', b'H', b'I'], vec![3.into()]),
        ])
        .unwrap();
        let map = generate("sized", &set, &canned(prefixed_output()), &FunctionOptions::default())
            .unwrap();

        assert_eq!(map.length_encoding(), Some(LengthEncoding { position: 0, bias: 1 }));
        assert!(map
            .text()
            .contains("register unsigned int len = ((unsigned char *)buf)[0] + 1;"));
        let three = vec!["3".to_string()];
        assert_eq!(map.simulate(&[4, b'F', b'G', b'H', b'I']), Some(Lookup::Hit(&three)));
        assert_eq!(map.simulate(&[2, b'X', b'Y']), Some(Lookup::NoMatch));
    }

    #[test]
    fn equal_lengths_cannot_feed_len() {
        let mut asso = vec![3u32; 256];
        asso[b'A' as usize] = 0;
        asso[b'B' as usize] = 1;
        asso[b'C' as usize] = 2;
        let raw = sample_output(SampleOutput {
            positions: "1",
            total: 3,
            min_len: 3,
            max_len: 3,
            min_hash: 3,
            max_hash: 5,
            asso: Some(&asso),
            calc: "  return len + asso_values[(unsigned char)str[0]];",
            wordlist: "    {(char*)0}, {(char*)0}, {(char*)0},\n    {\"AAA\",1}, {\"BBB\",2}, {\"CCC\",3}",
        });
        let set = TrainingSet::from_rows(vec![
            Row::new("AAA", vec![1.into()]),
            Row::new("BBB", vec![2.into()]),
            Row::new("CCC", vec![3.into()]),
        ])
        .unwrap();
        let err = generate("m", &set, &canned(raw), &FunctionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::LengthNotInferable(_)));
    }

    #[test]
    fn opaque_hash_skips_verification() {
        let raw = state_output().replace(
            "return asso_values[(unsigned char)str[0]];",
            "return mix(str);",
        );
        let map = generate("m", &states(), &canned(raw), &FunctionOptions::default()).unwrap();
        assert!(!map.is_verified());
        assert_eq!(map.simulate(b"RUNNING"), None);
        assert!(map.text().contains("register unsigned int hval = mix(buf);"));
    }

    #[test]
    fn builder_applies_overrides() {
        let mut builder = MapBuilder::new("state_idx").with_options(FunctionOptions {
            output_ctype: Some("unsigned int".into()),
            nomatch: None,
            header: Header::Omitted,
        });
        builder
            .push(Row::new("RUNNING", vec![1.into()]))
            .unwrap()
            .push(Row::new("STOPPED", vec![2.into()]))
            .unwrap()
            .push(Row::new("ERROR", vec![3.into()]))
            .unwrap();
        assert!(builder.push(Row::new("ERROR", vec![4.into()])).is_err());
        assert_eq!(builder.training_set().len(), 3);

        let map = builder.build(&canned(state_output())).unwrap();
        assert_eq!(map.sentinel(), "0");
        assert!(map.text().starts_with("static __attribute__"));
        assert!(map.text().contains("unsigned int state_idx("));
    }
}
