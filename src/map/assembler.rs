//! Lookup function assembly.
//!
//! Stitches the solver's weight table, its rewritten hash calculation and the
//! result table into one self-contained C function taking only a key buffer.

use crate::core::error::InvalidRowError;
use crate::map::input::{OutputType, ValueKind};
use crate::map::length::LengthEncoding;
use crate::map::parser::{contains_word, replace_word, KeyPosition, SolverResult};
use std::fmt::Write as _;

/// Functions shorter than this have their blank lines removed.
const COMPACT_BELOW_LINES: usize = 40;

/// Result table rows never exceed this width.
const TABLE_WIDTH: usize = 100;

const INDENT: &str = "    ";

/// Documentation comment placed above the function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Header {
    /// Generated from the solver's metadata
    #[default]
    Generated,
    /// Caller-supplied text, emitted verbatim
    Custom(String),
    /// No comment
    Omitted,
}

/// Everything the assembler needs for one function.
#[derive(Debug)]
pub struct FunctionParts<'a> {
    /// Function name
    pub name: &'a str,
    /// Declared return type
    pub output: &'a OutputType,
    /// Value returned on no match
    pub sentinel: &'a str,
    /// Parsed solver run
    pub solved: &'a SolverResult,
    /// Rendered payload per result slot, `None` for holes
    pub slots: &'a [Option<Vec<String>>],
    /// Length recovery, when the hash reads `len`
    pub length: Option<LengthEncoding>,
    /// Comment style
    pub header: &'a Header,
    /// Declarations emitted ahead of the function (row struct)
    pub prelude: Option<&'a str>,
}

/// Render the complete function text.
pub fn assemble(parts: &FunctionParts<'_>) -> String {
    let mut body = Vec::new();

    if let Some(asso) = &parts.solved.asso_values {
        body.push(format!(
            "{}static const {} asso_values[] = {{",
            INDENT, asso.element_type
        ));
        body.extend(weight_rows(&asso.values));
        body.push(format!("{}}};", INDENT));
    }

    let element = parts.output.element_type();
    let separator = if element.ends_with('*') { "" } else { " " };
    body.push(format!(
        "{}static const {}{}returnvals[] = {{",
        INDENT, element, separator
    ));
    body.extend(result_rows(&slot_initialisers(parts)));
    body.push(format!("{}}};", INDENT));
    body.push(String::new());

    if let Some(length) = parts.length {
        body.push(format!("{}{}", INDENT, length.c_declaration()));
    }
    body.extend(rewrite_hash_calc(&parts.solved.hash_calc));
    body.push(String::new());

    let hit = if parts.output.returns_slot_address() {
        "&(returnvals[hval])"
    } else {
        "returnvals[hval]"
    };
    body.push(format!(
        "{}if (__builtin_expect(!!(hval <= {}), 1))",
        INDENT, parts.solved.max_hash_value
    ));
    body.push(format!("{}{}return {};", INDENT, INDENT, hit));
    body.push(format!("{}return {};", INDENT, parts.sentinel));

    if body.len() + 3 < COMPACT_BELOW_LINES {
        body.retain(|line| !line.trim().is_empty());
    }

    let mut text = String::new();
    if let Some(prelude) = parts.prelude {
        text.push_str(prelude);
        if !prelude.ends_with('\n') {
            text.push('\n');
        }
    }
    match parts.header {
        Header::Generated => text.push_str(&header_comment(parts)),
        Header::Custom(custom) => {
            text.push_str(custom);
            if !custom.ends_with('\n') {
                text.push('\n');
            }
        }
        Header::Omitted => {}
    }
    let _ = writeln!(
        text,
        "static __attribute__ (( __always_inline__, __nonnull__, __pure__ )) {}{}(register const char *buf)",
        return_prefix(parts.output),
        parts.name
    );
    text.push_str("{\n");
    for line in body {
        text.push_str(line.trim_end());
        text.push('\n');
    }
    text.push_str("}\n");
    text
}

/// Definition of `struct NAME_result` for multi-value rows.
pub fn struct_definition(name: &str, columns: &[ValueKind]) -> Result<String, InvalidRowError> {
    let mut def = format!("struct {}_result {{\n", name.trim());
    for (i, kind) in columns.iter().enumerate() {
        let field = match kind {
            ValueKind::Integer => "int ",
            ValueKind::String => "const char *",
            ValueKind::Raw => return Err(InvalidRowError::UnknownOutputType { kind: kind.name() }),
        };
        let _ = writeln!(def, "{}{}v{};", INDENT, field, i);
    }
    def.push_str("};\n");
    Ok(def)
}

fn return_prefix(output: &OutputType) -> String {
    let prefix = output.declarator_prefix();
    if output.is_pointer() && !prefix.starts_with("const ") {
        format!("const {}", prefix)
    } else {
        prefix
    }
}

fn slot_initialisers(parts: &FunctionParts<'_>) -> Vec<String> {
    let hole = if parts.output.returns_slot_address() {
        "{0}".to_string()
    } else {
        parts.sentinel.to_string()
    };
    parts
        .slots
        .iter()
        .map(|slot| match slot {
            None => hole.clone(),
            Some(values) if values.len() == 1 && !parts.output.is_composite() => values[0].clone(),
            Some(values) => format!("{{{}}}", values.join(", ")),
        })
        .collect()
}

/// Weight table rows: groups of ten, three groups per line.
fn weight_rows(values: &[u32]) -> Vec<String> {
    let width = values.iter().max().map_or(1, |v| v.to_string().len());
    values
        .chunks(30)
        .map(|line| {
            let groups: Vec<String> = line
                .chunks(10)
                .map(|group| {
                    group
                        .iter()
                        .map(|v| format!("{:>width$}", v, width = width))
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .collect();
            format!("{}{}{},", INDENT, INDENT, groups.join(",  "))
        })
        .collect()
}

/// Result table rows, column aligned within [`TABLE_WIDTH`].
fn result_rows(entries: &[String]) -> Vec<String> {
    let longest = entries.iter().map(String::len).max().unwrap_or(0);
    let cell = (longest + 1).min(TABLE_WIDTH);
    let columns = ((TABLE_WIDTH - 8) / (cell + 1)).max(1);
    entries
        .chunks(columns)
        .map(|row| {
            let cells: String = row
                .iter()
                .map(|e| format!("{:<width$}", format!("{},", e), width = cell + 1))
                .collect();
            format!("{}{}{}", INDENT, INDENT, cells.trim_end())
        })
        .collect()
}

/// Rewrite the solver's hash calculation for a buffer-only signature.
///
/// `str` becomes `buf`, the working value is declared `unsigned`, the final
/// `return` assigns `hval` instead, and everything is reindented.
fn rewrite_hash_calc(calc: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in calc.lines() {
        let line = replace_word(raw.trim(), "str", "buf");
        if line == "{" {
            if let Some(prev) = lines.iter_mut().rev().find(|l| !l.is_empty()) {
                if prev.starts_with("switch") {
                    prev.push_str(" {");
                    continue;
                }
            }
        }
        lines.push(line);
    }

    let mut declared = false;
    for line in &mut lines {
        if declares_hval(line) {
            let from = line.find("hval").unwrap_or(0);
            *line = format!("register unsigned int {}", &line[from..]);
            declared = true;
        } else if let Some(expr) = line.strip_prefix("return ") {
            *line = if declared {
                format!("hval = {}", expr)
            } else {
                declared = true;
                format!("register unsigned int hval = {}", expr)
            };
        }
    }

    reindent(&lines)
}

fn declares_hval(line: &str) -> bool {
    let first = line.split_whitespace().next().unwrap_or("");
    matches!(first, "register" | "unsigned" | "int" | "signed")
        && contains_word(line, "hval")
}

fn reindent(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut depth = 1usize;
    let mut switch_bodies: Vec<usize> = Vec::new();

    for line in lines {
        if line.is_empty() {
            out.push(String::new());
            continue;
        }
        let closes = line.starts_with('}');
        if closes {
            depth = depth.saturating_sub(1).max(1);
            if switch_bodies.last() == Some(&(depth + 1)) {
                switch_bodies.pop();
            }
        }
        let label = line.starts_with("case ") || line.starts_with("default");
        let level = if label && switch_bodies.last() == Some(&depth) {
            depth - 1
        } else {
            depth
        };
        out.push(format!("{}{}", INDENT.repeat(level), line));
        if line.ends_with('{') {
            depth += 1;
            if line.starts_with("switch") {
                switch_bodies.push(depth);
            }
        }
    }
    out
}

/// Sentinel as written in documentation, without a leading cast.
fn bare_sentinel(sentinel: &str) -> &str {
    let s = sentinel.trim();
    if s.starts_with('(') {
        if let Some(close) = s.find(')') {
            let rest = s[close + 1..].trim();
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    s
}

fn header_comment(parts: &FunctionParts<'_>) -> String {
    let solved = parts.solved;
    let minimal = solved.is_minimal();
    let mut c = String::from("/**\n");
    let _ = writeln!(
        c,
        " * Looks up the value for one of {} trained keys with a {}perfect hash.",
        solved.total_keywords,
        if minimal { "minimal " } else { "(almost minimal) " }
    );
    c.push_str(" *\n");
    match parts.length {
        Some(length) => {
            let _ = writeln!(c, " * @param buf key bytes; the key length is {}", length);
        }
        None => c.push_str(" * @param buf key bytes\n"),
    }
    let _ = writeln!(c, " * @retval {} no match", bare_sentinel(parts.sentinel));
    if parts.output.returns_slot_address() && !minimal {
        c.push_str(" * @retval &{0} no match (unused slot of the table)\n");
    }
    c.push_str(" * @retval other the value stored for the matching key\n");
    c.push_str(" *\n");
    c.push_str(" * Warning: membership is probabilistic, not exact. A trained key always\n");
    c.push_str(" * returns its own value. Any other input usually returns the no-match\n");
    c.push_str(" * value but can share a trained key's hash and return that key's value.\n");
    c.push_str(" *\n");
    c.push_str(" * Some numbers:\n");
    let _ = writeln!(c, " *   num_trained_inputs = {}", solved.total_keywords);
    let _ = writeln!(c, " *   min_input_size     = {}", solved.min_word_length);
    let _ = writeln!(c, " *   max_input_size     = {}", solved.max_word_length);
    if !solved.key_positions.is_empty() {
        let positions: Vec<String> = solved.key_positions.iter().map(KeyPosition::to_string).collect();
        let _ = writeln!(c, " *   critical_positions = {}", positions.join(", "));
        c.push_str(" *     (untrained inputs agreeing with a trained key at these\n");
        c.push_str(" *     positions are the likely false positives)\n");
    }
    c.push_str(" */\n");
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::parser::{parse, tests::state_output};

    fn int_slots() -> Vec<Option<Vec<String>>> {
        vec![
            Some(vec!["3".into()]),
            Some(vec!["1".into()]),
            Some(vec!["2".into()]),
        ]
    }

    #[test]
    fn assembles_integer_lookup() {
        let solved = parse(&state_output()).unwrap();
        let output = OutputType::new("int");
        let slots = int_slots();
        let text = assemble(&FunctionParts {
            name: "state_idx",
            output: &output,
            sentinel: "-1",
            solved: &solved,
            slots: &slots,
            length: None,
            header: &Header::Generated,
            prelude: None,
        });

        assert!(text.starts_with("/**\n * Looks up the value for one of 3 trained keys with a minimal perfect hash."));
        assert!(text.contains(
            "static __attribute__ (( __always_inline__, __nonnull__, __pure__ )) int state_idx(register const char *buf)\n{\n"
        ));
        assert!(text.contains("    static const unsigned char asso_values[] = {\n"));
        assert!(text.contains("    static const int returnvals[] = {\n        3, 1, 2,\n    };\n"));
        assert!(text.contains("    register unsigned int hval = asso_values[(unsigned char)buf[0]];\n"));
        assert!(text.contains("    if (__builtin_expect(!!(hval <= 2), 1))\n        return returnvals[hval];\n    return -1;\n}\n"));
        assert!(text.contains(" * @retval -1 no match"));
        assert!(text.contains(" *   critical_positions = 0"));
        assert!(!text.contains("\n\n"), "short functions are compacted");
        assert!(!text.contains("str["));
    }

    #[test]
    fn struct_rows_return_slot_address() {
        let mut solved = parse(&state_output()).unwrap();
        solved.wordlist.push(None);
        solved.max_hash_value = 3;
        let output = OutputType::composite("state");
        let slots = vec![
            Some(vec!["3".into(), "\"E\"".into()]),
            None,
            Some(vec!["2".into(), "\"S\"".into()]),
            None,
        ];
        let prelude = struct_definition("state", &[ValueKind::Integer, ValueKind::String]).unwrap();
        let text = assemble(&FunctionParts {
            name: "state_row",
            output: &output,
            sentinel: &output.default_sentinel(),
            solved: &solved,
            slots: &slots,
            length: None,
            header: &Header::Generated,
            prelude: Some(&prelude),
        });

        assert!(text.starts_with("struct state_result {\n    int v0;\n    const char *v1;\n};\n"));
        assert!(text.contains(") const struct state_result *state_row(register const char *buf)"));
        assert!(text.contains("static const struct state_result returnvals[] = {"));
        assert!(text.contains("{3, \"E\"}, {0},"));
        assert!(text.contains("return &(returnvals[hval]);"));
        assert!(text.contains("return (struct state_result *)NULL;"));
        assert!(text.contains("(almost minimal)"));
        assert!(text.contains("@retval &{0} no match"));
        assert!(text.contains("@retval NULL no match"));
    }

    #[test]
    fn raw_struct_column_is_rejected() {
        assert!(struct_definition("x", &[ValueKind::Integer, ValueKind::Raw]).is_err());
    }

    #[test]
    fn switch_calc_is_rewritten_and_reindented() {
        let calc = "  register int hval = len;\n\n  switch (hval)\n    {\n      default:\n        hval += asso_values[(unsigned char)str[2]];\n      /*FALLTHROUGH*/\n      case 2:\n        hval += asso_values[(unsigned char)str[0]];\n        break;\n    }\n  return hval + asso_values[(unsigned char)str[len - 1]];";
        let lines = rewrite_hash_calc(calc);
        assert_eq!(
            lines,
            vec![
                "    register unsigned int hval = len;",
                "",
                "    switch (hval) {",
                "    default:",
                "        hval += asso_values[(unsigned char)buf[2]];",
                "        /*FALLTHROUGH*/",
                "    case 2:",
                "        hval += asso_values[(unsigned char)buf[0]];",
                "        break;",
                "    }",
                "    hval = hval + asso_values[(unsigned char)buf[len - 1]];",
            ]
        );
    }

    #[test]
    fn unsigned_declaration_is_not_doubled() {
        let lines = rewrite_hash_calc("register unsigned int hval = 0;\nreturn hval;");
        assert_eq!(lines[0], "    register unsigned int hval = 0;");
        assert_eq!(lines[1], "    hval = hval;");
    }

    #[test]
    fn length_declaration_and_custom_header() {
        let mut solved = parse(&state_output()).unwrap();
        solved.hash_calc = "  return len + asso_values[(unsigned char)str[1]];".into();
        let output = OutputType::new("const char *");
        let slots = vec![Some(vec!["\"a\"".into()]), None, Some(vec!["\"b\"".into()])];
        let text = assemble(&FunctionParts {
            name: "names",
            output: &output,
            sentinel: "(char *)NULL",
            solved: &solved,
            slots: &slots,
            length: Some(LengthEncoding { position: 0, bias: 2 }),
            header: &Header::Custom("/// names".into()),
            prelude: None,
        });
        assert!(text.starts_with("/// names\nstatic __attribute__"));
        assert!(text.contains(") const char *names(register const char *buf)"));
        assert!(text.contains("static const char *returnvals[] = {\n        \"a\","));
        assert!(text.contains("(char *)NULL, \"b\",\n    };"));
        assert!(text.contains(
            "    register unsigned int len = ((unsigned char *)buf)[0] + 2;\n    register unsigned int hval = len + asso_values[(unsigned char)buf[1]];\n"
        ));
    }

    #[test]
    fn weight_rows_group_by_ten() {
        let values: Vec<u32> = (0..35).collect();
        let rows = weight_rows(&values);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("         0, 1, 2"));
        assert!(rows[0].contains(" 9,  10,"));
        assert!(rows[1].ends_with("34,"));
    }

    #[test]
    fn result_rows_wrap_within_width() {
        let entries: Vec<String> = (0..40).map(|i| format!("\"key_{:02}\"", i)).collect();
        for row in result_rows(&entries) {
            assert!(row.len() <= TABLE_WIDTH);
        }
        let wide = vec!["x".repeat(150)];
        assert_eq!(result_rows(&wide).len(), 1);
    }

    #[test]
    fn sentinel_casts_are_stripped_for_docs() {
        assert_eq!(bare_sentinel("(char *)NULL"), "NULL");
        assert_eq!(bare_sentinel("-1"), "-1");
        assert_eq!(bare_sentinel("(-1)"), "(-1)");
    }
}
