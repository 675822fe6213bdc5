//! Structural extraction of the solver's generated C code.
//!
//! This is deliberately not a C parser. It pulls a fixed list of sections out
//! of the text the solver emits and fails with [`ParseError`] as soon as one
//! of the required ones is missing, since that means the solver's output
//! format drifted:
//!
//! | section                         | required |
//! |---------------------------------|----------|
//! | `TOTAL_KEYWORDS`                | yes      |
//! | `MIN_WORD_LENGTH` / `MAX_..`    | yes      |
//! | `MIN_HASH_VALUE` / `MAX_..`     | yes      |
//! | `maximum key range`/duplicates  | yes      |
//! | `hash (...)` function body      | yes      |
//! | `asso_values[]` weight table    | no       |
//! | `wordlist[]` result table       | yes      |
//! | `Computed positions: -k'..'`    | no       |

use crate::core::error::ParseError;
use std::fmt;

/// Structured view of one solver run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolverResult {
    /// Number of keys the solver hashed
    pub total_keywords: usize,
    /// Shortest key length seen by the solver
    pub min_word_length: usize,
    /// Longest key length seen by the solver
    pub max_word_length: usize,
    /// Lowest hash value of any key
    pub min_hash_value: u32,
    /// Highest hash value of any key
    pub max_hash_value: u32,
    /// Reported key range
    pub max_key_range: u32,
    /// Keys sharing a hash value
    pub duplicates: u32,
    /// Byte-weight table; absent when the key space is trivially small
    pub asso_values: Option<AssoTable>,
    /// Hash-calculation statements following the weight table
    pub hash_calc: String,
    /// Result table, one slot per hash value
    pub wordlist: Vec<Option<WordlistEntry>>,
    /// Byte positions the hash reads
    pub key_positions: Vec<KeyPosition>,
}

/// Byte-weight table declared inside the solver's hash function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssoTable {
    /// Declared element type, e.g. `unsigned char`
    pub element_type: String,
    /// Weights indexed by byte value
    pub values: Vec<u32>,
}

/// Occupied result-table slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WordlistEntry {
    /// Key exactly as the solver spelled it (a C string literal)
    pub key_literal: String,
    /// Payload initialisers, verbatim
    pub payload: Vec<String>,
}

/// Buffer offset read by the hash function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPosition {
    /// Zero-based offset from the start of the key
    Offset(usize),
    /// The key's last byte
    Last,
}

impl fmt::Display for KeyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPosition::Offset(n) => write!(f, "{}", n),
            KeyPosition::Last => f.write_str("last"),
        }
    }
}

impl SolverResult {
    /// True when the hash calculation reads the key length
    pub fn references_length(&self) -> bool {
        contains_word(&self.hash_calc, "len")
    }

    /// True when every result slot holds a trained key
    pub fn is_minimal(&self) -> bool {
        self.total_keywords == self.wordlist.len()
    }

    /// Number of slots holding a key
    pub fn occupied_slots(&self) -> usize {
        self.wordlist.iter().filter(|e| e.is_some()).count()
    }
}

/// Parse the solver's generated code.
pub fn parse(raw: &str) -> Result<SolverResult, ParseError> {
    let total_keywords = define_value(raw, "TOTAL_KEYWORDS")?;
    let min_word_length = define_value(raw, "MIN_WORD_LENGTH")?;
    let max_word_length = define_value(raw, "MAX_WORD_LENGTH")?;
    let min_hash_value = define_value(raw, "MIN_HASH_VALUE")?;
    let max_hash_value = define_value(raw, "MAX_HASH_VALUE")?;

    let max_key_range = comment_number(raw, "maximum key range =")
        .ok_or(ParseError::MissingSection("maximum key range"))?;
    let duplicates =
        comment_number(raw, "duplicates =").ok_or(ParseError::MissingSection("duplicates"))?;

    let body = hash_body(raw)?;
    let (asso_values, hash_calc) = split_hash_body(&body)?;

    let mut wordlist = parse_wordlist(raw)?;
    let slots = max_hash_value as usize + 1;
    if wordlist.len() > slots {
        return Err(ParseError::Inconsistent(format!(
            "result table has {} slots but MAX_HASH_VALUE is {}",
            wordlist.len(),
            max_hash_value
        )));
    }
    wordlist.resize(slots, None);

    let key_positions = key_positions(raw)?;

    Ok(SolverResult {
        total_keywords: total_keywords as usize,
        min_word_length: min_word_length as usize,
        max_word_length: max_word_length as usize,
        min_hash_value,
        max_hash_value,
        max_key_range,
        duplicates,
        asso_values,
        hash_calc,
        wordlist,
        key_positions,
    })
}

fn define_value(raw: &str, name: &'static str) -> Result<u32, ParseError> {
    for line in raw.lines() {
        let mut words = line.split_whitespace();
        if words.next() != Some("#define") || words.next() != Some(name) {
            continue;
        }
        let value = words.next().unwrap_or("");
        return value.parse().map_err(|_| ParseError::Malformed {
            section: name,
            detail: format!("expected a number, found `{}`", value),
        });
    }
    Err(ParseError::MissingSection(name))
}

fn comment_number(raw: &str, label: &str) -> Option<u32> {
    let start = raw.find(label)? + label.len();
    let digits: String = raw[start..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Lines between the opening and closing braces of `hash (...)`.
fn hash_body(raw: &str) -> Result<String, ParseError> {
    let lines: Vec<&str> = raw.lines().collect();
    let sig = lines
        .iter()
        .enumerate()
        .position(|(i, line)| is_hash_signature(line, i.checked_sub(1).map(|p| lines[p])))
        .ok_or(ParseError::MissingSection("hash function"))?;

    let open = (sig..lines.len())
        .find(|&i| lines[i].contains('{'))
        .ok_or_else(|| malformed("hash function", "no opening brace"))?;
    let close = (open + 1..lines.len())
        .find(|&i| lines[i].starts_with('}'))
        .ok_or_else(|| malformed("hash function", "no closing brace"))?;

    let mut body = lines[open + 1..close].join("\n");
    let after_brace = &lines[open][lines[open].find('{').map_or(0, |p| p + 1)..];
    if !after_brace.trim().is_empty() {
        body = format!("{}\n{}", after_brace, body);
    }
    Ok(body)
}

fn is_hash_signature(line: &str, previous: Option<&str>) -> bool {
    let trimmed = line.trim_start();
    let Some(idx) = find_word(trimmed, "hash") else {
        return false;
    };
    if !trimmed[idx + 4..].trim_start().starts_with('(') {
        return false;
    }
    let prefix = &trimmed[..idx];
    contains_word(prefix, "static")
        || (prefix.trim().is_empty()
            && previous.map_or(false, |p| contains_word(p.trim_start(), "static")))
}

/// Split the hash body into the weight table and the calculation after it.
fn split_hash_body(body: &str) -> Result<(Option<AssoTable>, String), ParseError> {
    let lines: Vec<&str> = body.lines().collect();
    let table_end = lines.iter().position(|l| l.trim() == "};");

    let Some(end) = table_end else {
        if contains_word(body, "return") {
            return Ok((None, body.trim_matches('\n').to_string()));
        }
        return Err(malformed("hash function", "no return statement"));
    };

    let decl = lines[..end].join("\n");
    let calc = lines[end + 1..].join("\n");
    if !contains_word(&calc, "return") {
        return Err(malformed("hash function", "no return statement after weight table"));
    }

    let asso = if decl.contains("asso_values") {
        Some(parse_asso_values(&decl)?)
    } else {
        None
    };
    Ok((asso, calc.trim_matches('\n').to_string()))
}

fn parse_asso_values(decl: &str) -> Result<AssoTable, ParseError> {
    let name_at = decl
        .find("asso_values")
        .ok_or(ParseError::MissingSection("asso_values"))?;
    let line_start = decl[..name_at].rfind('\n').map_or(0, |p| p + 1);
    let element_type = decl[line_start..name_at]
        .split_whitespace()
        .filter(|w| *w != "static" && *w != "const")
        .collect::<Vec<_>>()
        .join(" ");
    if element_type.is_empty() {
        return Err(malformed("asso_values", "no element type"));
    }

    let open = decl[name_at..]
        .find('{')
        .map(|p| name_at + p + 1)
        .ok_or_else(|| malformed("asso_values", "no initialiser"))?;
    let values = decl[open..]
        .split(|c: char| c == ',' || c.is_whitespace() || c == '}')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<u32>()
                .map_err(|_| malformed("asso_values", format!("bad weight `{}`", t)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.is_empty() {
        return Err(malformed("asso_values", "empty table"));
    }
    Ok(AssoTable {
        element_type,
        values,
    })
}

fn parse_wordlist(raw: &str) -> Result<Vec<Option<WordlistEntry>>, ParseError> {
    let decl = raw
        .find("wordlist[] =")
        .ok_or(ParseError::MissingSection("wordlist"))?;
    let rest = &raw[decl..];
    let open = rest
        .find('{')
        .ok_or_else(|| malformed("wordlist", "no initialiser"))?;

    let mut body = String::new();
    let mut closed = false;
    for line in rest[open + 1..].lines() {
        let trimmed = line.trim();
        if trimmed == "};" {
            closed = true;
            break;
        }
        if trimmed.starts_with('#') {
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    if !closed {
        return Err(malformed("wordlist", "unterminated table"));
    }

    brace_groups(&body)?
        .into_iter()
        .map(|group| {
            let mut fields = split_top_level(&group).into_iter();
            let key_literal = fields.next().unwrap_or_default();
            if is_empty_slot(&key_literal) {
                return Ok(None);
            }
            Ok(Some(WordlistEntry {
                key_literal,
                payload: fields.collect(),
            }))
        })
        .collect()
}

fn is_empty_slot(field: &str) -> bool {
    let squashed: String = field.chars().filter(|c| !c.is_whitespace()).collect();
    matches!(squashed.as_str(), "" | "\"\"" | "0" | "(char*)0" | "(constchar*)0")
}

/// Contents of each top-level `{...}` group, honouring string literals.
fn brace_groups(body: &str) -> Result<Vec<String>, ParseError> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_str: Option<char> = None;
    let mut escaped = false;

    for c in body.chars() {
        if let Some(q) = in_str {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '{' => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
            }
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| malformed("wordlist", "unbalanced braces"))?;
                if depth == 0 {
                    groups.push(std::mem::take(&mut current));
                } else {
                    current.push(c);
                }
            }
            '"' | '\'' if depth > 0 => {
                in_str = Some(c);
                current.push(c);
            }
            _ if depth > 0 => current.push(c),
            _ => {}
        }
    }

    if depth != 0 || in_str.is_some() {
        return Err(malformed("wordlist", "unbalanced braces or quotes"));
    }
    Ok(groups)
}

/// Split on commas that are not inside quotes, parentheses or braces.
pub(crate) fn split_top_level(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_str: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(q) = in_str {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_str = Some(c);
                current.push(c);
            }
            '(' | '{' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' | ']' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    let last = current.trim();
    if !last.is_empty() || !fields.is_empty() {
        fields.push(last.to_string());
    }
    fields
}

fn key_positions(raw: &str) -> Result<Vec<KeyPosition>, ParseError> {
    const LABEL: &str = "Computed positions: -k'";
    let Some(start) = raw.find(LABEL).map(|p| p + LABEL.len()) else {
        return Ok(Vec::new());
    };
    let list = raw[start..]
        .split('\'')
        .next()
        .ok_or_else(|| malformed("computed positions", "unterminated list"))?;

    let mut positions = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if item == "$" {
            positions.push(KeyPosition::Last);
            continue;
        }
        let (lo, hi) = match item.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (item, item),
        };
        let parse = |s: &str| {
            s.trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| malformed("computed positions", format!("bad position `{}`", item)))
        };
        for p in parse(lo)?..=parse(hi)? {
            positions.push(KeyPosition::Offset(p - 1));
        }
    }
    Ok(positions)
}

/// Decode a C string literal as the solver spells keys.
pub fn decode_c_string(literal: &str) -> Option<Vec<u8>> {
    let inner = literal.trim().strip_prefix('"')?.strip_suffix('"')?;
    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let esc = *bytes.get(i)?;
        i += 1;
        match esc {
            b'0'..=b'7' => {
                let mut value = u32::from(esc - b'0');
                let mut digits = 1;
                while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                out.push(u8::try_from(value).ok()?);
            }
            b'x' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let hex = std::str::from_utf8(&bytes[start..i]).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
            }
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\\' | b'"' | b'\'' | b'?' => out.push(esc),
            _ => return None,
        }
    }
    Some(out)
}

fn malformed(section: &'static str, detail: impl Into<String>) -> ParseError {
    ParseError::Malformed {
        section,
        detail: detail.into(),
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte index of `word` in `text` as a whole identifier.
pub(crate) fn find_word(text: &str, word: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(pos) = text[from..].find(word) {
        let at = from + pos;
        let end = at + word.len();
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return Some(at);
        }
        from = at + word.len();
    }
    None
}

/// True when `word` occurs in `text` as a whole identifier.
pub(crate) fn contains_word(text: &str, word: &str) -> bool {
    find_word(text, word).is_some()
}

/// Replace whole-identifier occurrences of `from` with `to`.
pub(crate) fn replace_word(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = find_word(rest, from) {
        out.push_str(&rest[..at]);
        out.push_str(to);
        rest = &rest[at + from.len()..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Solver output for RUNNING=1, STOPPED=2, ERROR=3 hashed on the first byte.
    pub(crate) fn state_output() -> String {
        let mut asso = vec![3u32; 256];
        asso[b'E' as usize] = 0;
        asso[b'R' as usize] = 1;
        asso[b'S' as usize] = 2;
        sample_output(SampleOutput {
            positions: "1",
            total: 3,
            min_len: 5,
            max_len: 7,
            min_hash: 0,
            max_hash: 2,
            asso: Some(&asso),
            calc: "  return asso_values[(unsigned char)str[0]];",
            wordlist: "    {\"ERROR\",3},\n    {\"RUNNING\",1},\n    {\"STOPPED\",2}",
        })
    }

    pub(crate) struct SampleOutput<'a> {
        pub positions: &'a str,
        pub total: usize,
        pub min_len: usize,
        pub max_len: usize,
        pub min_hash: u32,
        pub max_hash: u32,
        pub asso: Option<&'a [u32]>,
        pub calc: &'a str,
        pub wordlist: &'a str,
    }

    /// Render text shaped like the solver's ANSI-C output.
    pub(crate) fn sample_output(s: SampleOutput<'_>) -> String {
        let mut out = String::new();
        out.push_str("/* ANSI-C code produced by gperf version 3.1 */\n");
        out.push_str("/* Command-line: gperf --language=ANSI-C --no-strlen */\n");
        if !s.positions.is_empty() {
            out.push_str(&format!("/* Computed positions: -k'{}' */\n", s.positions));
        }
        out.push_str("\nstruct result_structure { const char *name; };\n\n");
        out.push_str(&format!("#define TOTAL_KEYWORDS {}\n", s.total));
        out.push_str(&format!("#define MIN_WORD_LENGTH {}\n", s.min_len));
        out.push_str(&format!("#define MAX_WORD_LENGTH {}\n", s.max_len));
        out.push_str(&format!("#define MIN_HASH_VALUE {}\n", s.min_hash));
        out.push_str(&format!("#define MAX_HASH_VALUE {}\n", s.max_hash));
        out.push_str(&format!(
            "/* maximum key range = {}, duplicates = 0 */\n\n",
            s.max_hash - s.min_hash + 1
        ));
        out.push_str("#ifdef __GNUC__\n__inline\n#endif\nstatic unsigned int\n");
        out.push_str("hash (register const char *str, register size_t len)\n{\n");
        if let Some(asso) = s.asso {
            out.push_str("  static const unsigned char asso_values[] =\n    {\n");
            for chunk in asso.chunks(10) {
                let row: Vec<String> = chunk.iter().map(|v| format!("{:>3}", v)).collect();
                out.push_str(&format!("      {},\n", row.join(", ")));
            }
            out.truncate(out.len() - 2);
            out.push_str("\n    };\n");
        }
        out.push_str(s.calc);
        out.push_str("\n}\n\n");
        out.push_str("static const struct result_structure wordlist[] =\n  {\n");
        out.push_str(s.wordlist);
        out.push_str("\n  };\n\n");
        out.push_str("const struct result_structure *\nin_word_set (register const char *str, register size_t len)\n{\n  return 0;\n}\n");
        out
    }

    #[test]
    fn parses_metadata_and_tables() {
        let result = parse(&state_output()).unwrap();
        assert_eq!(result.total_keywords, 3);
        assert_eq!(result.min_word_length, 5);
        assert_eq!(result.max_word_length, 7);
        assert_eq!(result.max_hash_value, 2);
        assert_eq!(result.max_key_range, 3);
        assert_eq!(result.duplicates, 0);
        assert_eq!(result.key_positions, vec![KeyPosition::Offset(0)]);

        let asso = result.asso_values.as_ref().unwrap();
        assert_eq!(asso.element_type, "unsigned char");
        assert_eq!(asso.values.len(), 256);
        assert_eq!(asso.values[b'R' as usize], 1);

        assert_eq!(result.hash_calc.trim(), "return asso_values[(unsigned char)str[0]];");
        assert!(!result.references_length());
        assert!(result.is_minimal());

        let first = result.wordlist[0].as_ref().unwrap();
        assert_eq!(first.key_literal, "\"ERROR\"");
        assert_eq!(first.payload, vec!["3".to_string()]);
    }

    #[test]
    fn holes_and_padding() {
        let raw = sample_output(SampleOutput {
            positions: "1,$",
            total: 2,
            min_len: 1,
            max_len: 3,
            min_hash: 1,
            max_hash: 4,
            asso: None,
            calc: "  return len;",
            wordlist: "    {(char*)0},\n#line 6 \"keys.gperf\"\n    {\"a\",\"x, y\"},\n    {(char*)0}, {\"abc\",\"z\"}",
        });
        let result = parse(&raw).unwrap();
        assert!(result.asso_values.is_none());
        assert!(result.references_length());
        assert_eq!(result.wordlist.len(), 5);
        assert_eq!(result.occupied_slots(), 2);
        assert!(result.wordlist[0].is_none());
        assert_eq!(
            result.wordlist[1].as_ref().unwrap().payload,
            vec!["\"x, y\"".to_string()]
        );
        assert!(result.wordlist[4].is_none());
        assert!(!result.is_minimal());
        assert_eq!(
            result.key_positions,
            vec![KeyPosition::Offset(0), KeyPosition::Last]
        );
    }

    #[test]
    fn missing_sections_fail_loudly() {
        let good = state_output();

        let no_total = good.replace("#define TOTAL_KEYWORDS 3\n", "");
        assert_eq!(
            parse(&no_total),
            Err(ParseError::MissingSection("TOTAL_KEYWORDS"))
        );

        let no_wordlist = good.replace("wordlist[] =", "words[] =");
        assert_eq!(parse(&no_wordlist), Err(ParseError::MissingSection("wordlist")));

        let no_hash = good.replace("hash (register", "mix (register");
        assert_eq!(parse(&no_hash), Err(ParseError::MissingSection("hash function")));

        let no_range = good.replace("maximum key range", "key range");
        assert!(matches!(parse(&no_range), Err(ParseError::MissingSection(_))));
    }

    #[test]
    fn oversized_wordlist_is_inconsistent() {
        let raw = state_output().replace("#define MAX_HASH_VALUE 2", "#define MAX_HASH_VALUE 1");
        assert!(matches!(parse(&raw), Err(ParseError::Inconsistent(_))));
    }

    #[test]
    fn position_ranges() {
        let raw = "/* Computed positions: -k'1-3,7' */";
        assert_eq!(
            key_positions(raw).unwrap(),
            vec![
                KeyPosition::Offset(0),
                KeyPosition::Offset(1),
                KeyPosition::Offset(2),
                KeyPosition::Offset(6)
            ]
        );
        assert!(key_positions("/* Computed positions: -k'0' */").is_err());
    }

    #[test]
    fn decodes_solver_literals() {
        assert_eq!(decode_c_string("\"\\003AB\""), Some(vec![3, b'A', b'B']));
        assert_eq!(decode_c_string("\"\\x05F\\\"\""), Some(vec![0x5f, b'"']));
        assert_eq!(decode_c_string("\"\\x05\\x46\""), Some(vec![5, b'F']));
        assert_eq!(decode_c_string("\"\\0009\""), Some(vec![0, b'9']));
        assert_eq!(decode_c_string("ERROR"), None);
    }

    #[test]
    fn word_helpers() {
        assert!(contains_word("return len + 1;", "len"));
        assert!(!contains_word("return length;", "len"));
        assert_eq!(
            replace_word("str[0] + mystr[1] + str[len]", "str", "buf"),
            "buf[0] + mystr[1] + buf[len]"
        );
        assert_eq!(split_top_level("\"a,b\", f(1, 2), {3, 4}"), vec!["\"a,b\"", "f(1, 2)", "{3, 4}"]);
    }
}
