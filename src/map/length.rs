//! Implicit key-length recovery.
//!
//! The generated lookup receives only a buffer pointer. When the solver's hash
//! reads `len`, the length has to come from the key bytes themselves: some
//! offset `p` and bias `b` such that `len == buf[p] + b` for every trained key.
//! The search is a pure function over the samples so it can be exercised
//! without a solver.

use crate::core::error::LengthNotInferableError;
use std::fmt;

/// Where and how a key's length is encoded inside the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthEncoding {
    /// Byte offset holding the length cue
    pub position: usize,
    /// Added to the byte value to give the length
    pub bias: i64,
}

impl LengthEncoding {
    /// Length this encoding recovers from `buf`, or `None` if `buf` is too short
    #[inline]
    pub fn decode(&self, buf: &[u8]) -> Option<i64> {
        buf.get(self.position).map(|&b| i64::from(b) + self.bias)
    }

    /// C declaration of the local `len` variable
    pub fn c_declaration(&self) -> String {
        let mut decl = format!(
            "register unsigned int len = ((unsigned char *)buf)[{}]",
            self.position
        );
        match self.bias {
            b if b < 0 => decl.push_str(&format!(" - {}", b.unsigned_abs())),
            b if b > 0 => decl.push_str(&format!(" + {}", b)),
            _ => {}
        }
        decl.push(';');
        decl
    }
}

impl fmt::Display for LengthEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bias {
            b if b < 0 => write!(f, "buf[{}] - {}", self.position, b.unsigned_abs()),
            b if b > 0 => write!(f, "buf[{}] + {}", self.position, b),
            _ => write!(f, "buf[{}]", self.position),
        }
    }
}

/// A key buffer and the length the hash expects for it.
#[derive(Clone, Copy, Debug)]
pub struct LengthSample<'a> {
    /// Key bytes as passed to the lookup
    pub buffer: &'a [u8],
    /// Length the solver hashed with
    pub length: usize,
}

impl<'a> LengthSample<'a> {
    /// Sample whose expected length is the whole buffer
    pub fn whole(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            length: buffer.len(),
        }
    }
}

/// Find the lowest offset whose byte tracks the length with a constant bias.
///
/// Offsets `0..shortest_buffer` are scanned in order; the first consistent
/// one wins, so a size prefix at the very start of the key is preferred.
pub fn infer(samples: &[LengthSample<'_>]) -> Result<LengthEncoding, LengthNotInferableError> {
    let scanned = samples.iter().map(|s| s.buffer.len()).min().unwrap_or(0);
    let not_found = LengthNotInferableError {
        samples: samples.len(),
        scanned,
    };
    let (first, rest) = samples.split_first().ok_or(not_found.clone())?;

    let bias_at = |sample: &LengthSample<'_>, position: usize| {
        sample.length as i64 - i64::from(sample.buffer[position])
    };

    (0..scanned)
        .find_map(|position| {
            let bias = bias_at(first, position);
            rest.iter()
                .all(|s| bias_at(s, position) == bias)
                .then_some(LengthEncoding { position, bias })
        })
        .ok_or(not_found)
}
