//! Enum discovery in preprocessed C headers.
//!
//! Finds `typedef enum` declarations and resolves every label's value with a
//! small integer constant evaluator, so no C compiler is needed. Labels are
//! global in C, so a later enum may refer to labels of an earlier one.

use crate::map::parser::{find_word, split_top_level};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// A constant expression the evaluator cannot resolve.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot evaluate `{expr}`: {reason}")]
pub struct EvalError {
    /// Expression text
    pub expr: String,
    /// What went wrong
    pub reason: String,
}

/// A resolved enum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumDecl {
    /// Typedef name
    pub name: String,
    /// Labels in declaration order
    pub entries: Vec<EnumEntry>,
}

/// One enum label and its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumEntry {
    /// Label identifier
    pub label: String,
    /// Resolved value
    pub value: i64,
}

impl EnumDecl {
    /// Find an entry by label
    pub fn get(&self, label: &str) -> Option<&EnumEntry> {
        self.entries.iter().find(|e| e.label == label)
    }
}

/// Remove block and line comments, leaving string and char literals intact.
pub fn strip_comments(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = src[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
                out.push(b' ');
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = src[i..].find('\n').map_or(bytes.len(), |p| i + p);
            }
            q @ (b'"' | b'\'') => {
                out.push(q);
                i += 1;
                while i < bytes.len() && bytes[i] != q {
                    if bytes[i] == b'\\' && i + 1 < bytes.len() {
                        out.push(bytes[i]);
                        i += 1;
                    }
                    out.push(bytes[i]);
                    i += 1;
                }
                if i < bytes.len() {
                    out.push(q);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Every resolvable `typedef enum` in `src`, in source order.
///
/// Enums whose values cannot be resolved are skipped with a warning.
pub fn scan(src: &str) -> Vec<EnumDecl> {
    let cleaned = strip_comments(src);
    let mut symbols: HashMap<String, i64> = HashMap::new();
    let mut decls = Vec::new();

    for (name, body) in typedef_enums(&cleaned) {
        match resolve(&body, &symbols) {
            Ok(entries) => {
                for e in &entries {
                    symbols.insert(e.label.clone(), e.value);
                }
                decls.push(EnumDecl { name, entries });
            }
            Err(e) => warn!(enum_name = %name, error = %e, "Skipping enum"),
        }
    }
    decls
}

/// `(name, body)` of each `typedef enum NAME { body }` or
/// `typedef enum { body } NAME`.
fn typedef_enums(src: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    let mut rest = src;
    while let Some(at) = find_word(rest, "typedef") {
        rest = &rest[at + "typedef".len()..];
        let mut cur = Cursor::new(rest);
        if cur.ident().as_deref() != Some("enum") {
            continue;
        }
        let tag = cur.ident();
        if !cur.eat('{') {
            continue;
        }
        let Some(close) = cur.rest().find('}') else {
            break;
        };
        let body = cur.rest()[..close].to_string();
        cur.advance(close + 1);
        let name = match tag {
            Some(tag) => Some(tag),
            None => cur.ident(),
        };
        if let Some(name) = name {
            found.push((name, body));
        }
        rest = cur.rest();
    }
    found
}

fn resolve(body: &str, globals: &HashMap<String, i64>) -> Result<Vec<EnumEntry>, EvalError> {
    let mut local = globals.clone();
    let mut entries = Vec::new();
    let mut next = 0i64;

    for item in split_top_level(body) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (label, expr) = match assignment_split(item) {
            Some(at) => (item[..at].trim(), Some(item[at + 1..].trim())),
            None => (item, None),
        };
        if !is_ident(label) {
            return Err(EvalError {
                expr: item.to_string(),
                reason: "not an enum label".into(),
            });
        }
        let value = match expr {
            Some(expr) => evaluate(expr, &local)?,
            None => next,
        };
        local.insert(label.to_string(), value);
        entries.push(EnumEntry {
            label: label.to_string(),
            value,
        });
        next = value.wrapping_add(1);
    }
    Ok(entries)
}

/// Index of the `=` of `LABEL = expr`, ignoring comparison operators.
fn assignment_split(item: &str) -> Option<usize> {
    let b = item.as_bytes();
    (0..b.len()).find(|&i| {
        b[i] == b'='
            && b.get(i + 1) != Some(&b'=')
            && (i == 0 || !matches!(b[i - 1], b'<' | b'>' | b'!' | b'='))
    })
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.text.len());
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    fn ident(&mut self) -> Option<String> {
        self.skip_ws();
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.rest().len());
        let word = &self.rest()[..len];
        if !is_ident(word) {
            return None;
        }
        self.pos += len;
        Some(word.to_string())
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.rest().starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }
}

/// Evaluate an integer constant expression.
///
/// Supports decimal, hex and octal literals with `u`/`l` suffixes, character
/// literals, known labels, parentheses, unary `- ~ + !` and the binary
/// arithmetic, shift and bitwise operators with C precedence.
pub fn evaluate(expr: &str, symbols: &HashMap<String, i64>) -> Result<i64, EvalError> {
    let fail = |reason: String| EvalError {
        expr: expr.to_string(),
        reason,
    };
    let tokens = tokenize(expr).map_err(fail)?;
    let mut eval = Evaluator {
        tokens,
        pos: 0,
        symbols,
    };
    let value = eval.binary(0).map_err(fail)?;
    if eval.pos != eval.tokens.len() {
        return Err(fail("trailing tokens".into()));
    }
    Ok(value)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "<<", ">>", "(", ")", "+", "-", "*", "/", "%", "&", "|", "^", "~", "!",
];

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                i += 1;
            }
            tokens.push(Token::Num(parse_number(&expr[start..i])?));
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token::Ident(expr[start..i].to_string()));
        } else if c == b'\'' {
            let close = expr[i + 1..]
                .find(|ch| ch == '\'')
                .map(|p| i + 1 + p)
                .ok_or("unterminated character literal")?;
            // '\'' has its closing quote one further
            let close = if &expr[i + 1..close] == "\\" { close + 1 } else { close };
            tokens.push(Token::Num(parse_char(&expr[i + 1..close])?));
            i = close + 1;
        } else {
            let op = OPERATORS
                .iter()
                .find(|op| expr[i..].starts_with(**op))
                .ok_or_else(|| format!("unexpected `{}`", c as char))?;
            tokens.push(Token::Op(*op));
            i += op.len();
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Result<i64, String> {
    let digits = text.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<u64>()
    };
    parsed
        .map(|v| v as i64)
        .map_err(|_| format!("bad number `{}`", text))
}

fn parse_char(inner: &str) -> Result<i64, String> {
    let bytes = inner.as_bytes();
    let value = match bytes {
        [b] => i64::from(*b),
        [b'\\', b'n'] => 10,
        [b'\\', b't'] => 9,
        [b'\\', b'r'] => 13,
        [b'\\', b'a'] => 7,
        [b'\\', b'b'] => 8,
        [b'\\', b'f'] => 12,
        [b'\\', b'v'] => 11,
        [b'\\', c @ (b'\\' | b'\'' | b'"' | b'?')] => i64::from(*c),
        [b'\\', b'x', hex @ ..] => {
            let hex = std::str::from_utf8(hex).map_err(|e| e.to_string())?;
            i64::from_str_radix(hex, 16).map_err(|_| format!("bad escape `{}`", inner))?
        }
        [b'\\', oct @ ..] if !oct.is_empty() && oct.len() <= 3 => {
            let oct = std::str::from_utf8(oct).map_err(|e| e.to_string())?;
            i64::from_str_radix(oct, 8).map_err(|_| format!("bad escape `{}`", inner))?
        }
        _ => return Err(format!("unsupported character literal '{}'", inner)),
    };
    Ok(value)
}

struct Evaluator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    symbols: &'a HashMap<String, i64>,
}

fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "|" => 1,
        "^" => 2,
        "&" => 3,
        "<<" | ">>" => 4,
        "+" | "-" => 5,
        "*" | "/" | "%" => 6,
        _ => return None,
    })
}

impl Evaluator<'_> {
    fn next(&mut self) -> Result<Token, String> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or("unexpected end of expression")?;
        self.pos += 1;
        Ok(tok)
    }

    fn binary(&mut self, min_prec: u8) -> Result<i64, String> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op)) = self.tokens.get(self.pos) {
            let op = *op;
            let Some(prec) = precedence(op).filter(|p| *p >= min_prec) else {
                break;
            };
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        match self.next()? {
            Token::Num(n) => Ok(n),
            Token::Ident(name) => self
                .symbols
                .get(&name)
                .copied()
                .ok_or_else(|| format!("unknown identifier `{}`", name)),
            Token::Op("-") => Ok(self.unary()?.wrapping_neg()),
            Token::Op("+") => self.unary(),
            Token::Op("~") => Ok(!self.unary()?),
            Token::Op("!") => Ok(i64::from(self.unary()? == 0)),
            Token::Op("(") => {
                let v = self.binary(0)?;
                match self.next()? {
                    Token::Op(")") => Ok(v),
                    _ => Err("expected `)`".into()),
                }
            }
            tok => Err(format!("unexpected {:?}", tok)),
        }
    }
}

fn apply(op: &str, a: i64, b: i64) -> Result<i64, String> {
    let shift = |b: i64| u32::try_from(b).ok().filter(|s| *s < 64).ok_or("shift out of range");
    Ok(match op {
        "|" => a | b,
        "^" => a ^ b,
        "&" => a & b,
        "<<" => a.wrapping_shl(shift(b)?),
        ">>" => a.wrapping_shr(shift(b)?),
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "*" => a.wrapping_mul(b),
        "/" | "%" if b == 0 => return Err("division by zero".into()),
        "/" => a.wrapping_div(b),
        "%" => a.wrapping_rem(b),
        _ => return Err(format!("unknown operator `{}`", op)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> Result<i64, EvalError> {
        let mut symbols = HashMap::new();
        symbols.insert("BASE".to_string(), 16);
        evaluate(expr, &symbols)
    }

    #[test]
    fn evaluates_constants() {
        assert_eq!(eval("0x10u"), Ok(16));
        assert_eq!(eval("017"), Ok(15));
        assert_eq!(eval("'A'"), Ok(65));
        assert_eq!(eval("'\\n' + '\\x01'"), Ok(11));
        assert_eq!(eval("'\\''"), Ok(39));
        assert_eq!(eval("1 << 4 | 1"), Ok(17));
        assert_eq!(eval("BASE * 2 + -(3 - 1)"), Ok(30));
        assert_eq!(eval("~0"), Ok(-1));
        assert_eq!(eval("(BASE + 4) % 6"), Ok(2));
        assert!(eval("UNKNOWN + 1").is_err());
        assert!(eval("1 / 0").is_err());
        assert!(eval("1 +").is_err());
    }

    #[test]
    fn strips_comments_outside_literals() {
        let src = "a /* x */ b // tail\nc \"/* kept */\" '/'";
        assert_eq!(strip_comments(src), "a   b \nc \"/* kept */\" '/'");
    }

    #[test]
    fn scans_typedef_enums() {
        let src = r#"
            typedef enum state { RUNNING = 1, STOPPED, /* old */ ERROR = 'E', } state;
            typedef enum { LOW = STOPPED << 1, HIGH } level;
            enum untyped { NOPE };
        "#;
        let decls = scan(src);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name, "state");
        let values: Vec<i64> = decls[0].entries.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![1, 2, 69]);
        assert_eq!(decls[1].name, "level");
        assert_eq!(decls[1].get("LOW").map(|e| e.value), Some(4));
        assert_eq!(decls[1].get("HIGH").map(|e| e.value), Some(5));
    }

    #[test]
    fn unresolvable_enum_is_skipped() {
        let src = "typedef enum bad { A = FROM_ELSEWHERE } bad; typedef enum good { B } good;";
        let decls = scan(src);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "good");
    }
}
