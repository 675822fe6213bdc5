//! Enum value to label reverse maps.
//!
//! Each enum becomes a lookup keyed by the four native bytes of its `int`
//! value, plus an integer wrapper so C callers can write `$state(val)`.

use crate::consumers::enum_scan::EnumDecl;
use crate::consumers::{include_guard, EmittedNames};
use crate::core::config::EnumMapsConfig;
use crate::core::error::{InvalidRowError, Result};
use crate::map::{generate, FunctionOptions, Header, Row, Solver, TrainingSet, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

const NULL_PRELUDE: &str = "\n\n\n#ifndef NULL\n#define NULL ((void *)0)\n#endif\n\n";

/// Training rows for `decl`.
///
/// Keys are the little-endian bytes of each value truncated to 32 bits. When
/// several labels share a value the first one wins.
pub fn enum_rows(decl: &EnumDecl, config: &EnumMapsConfig) -> std::result::Result<TrainingSet, InvalidRowError> {
    let strip = config
        .label_prefixes
        .iter()
        .find(|rule| decl.name.starts_with(&rule.enum_prefix))
        .map(|rule| rule.label_prefix.as_str());

    let mut seen = HashSet::new();
    let mut set = TrainingSet::new();
    for entry in &decl.entries {
        let key = (entry.value as u32).to_le_bytes();
        if !seen.insert(key) {
            debug!(enum_name = %decl.name, label = %entry.label, "Alias keeps the first label");
            continue;
        }
        let label = strip
            .and_then(|p| entry.label.strip_prefix(p))
            .unwrap_or(&entry.label);
        set.push(Row::new(key, vec![Value::from(label)]))?;
    }
    Ok(set)
}

/// Reverse map section for one enum, or `None` when it is skipped.
pub fn render_enum_map<S>(
    decl: &EnumDecl,
    solver: &S,
    config: &EnumMapsConfig,
    emitted: &mut EmittedNames,
) -> Result<Option<String>>
where
    S: Solver + ?Sized,
{
    let name = &decl.name;
    if config.skip.iter().any(|s| s == name) {
        info!(enum_name = %name, "Skipping configured enum");
        return Ok(None);
    }
    if emitted.contains(name) {
        debug!(enum_name = %name, "Already emitted");
        return Ok(None);
    }
    if decl.entries.is_empty() {
        warn!(enum_name = %name, "Skipping enum without labels");
        return Ok(None);
    }

    let set = enum_rows(decl, config)?;
    let function = format!("_{}_str_map", name);
    let options = FunctionOptions {
        output_ctype: Some("const char *".to_string()),
        nomatch: None,
        header: Header::Custom(format!(
            "/// Looks up string associated with enums in the {name} enum table by looking at char buffer.\n\
             /// @see ${name}(int) below for something more useful.\n",
            name = name
        )),
    };
    let map = generate(&function, &set, solver, &options)?;

    let guard = format!("_{}_STR_MAP", include_guard(name));
    let mut out = String::from("\n\n");
    out.push_str(&format!("#ifndef {}\n#define {}\n", guard, guard));
    out.push_str(map.text());
    out.push_str(&format!(
        "\n\n/// Quick lookup of string for {name} enum values using integer.\n\
         /// @retval NULL if not found.\n\
         static inline __attribute__((__always_inline__,__pure__,__unused__)) const char * ${name}(int val)\n\
         {{\n    return {function}((const char *)(&val));\n}}\n",
        name = name,
        function = function
    ));
    out.push_str(&format!("#endif /* {} */\n", guard));

    emitted.insert(name);
    Ok(Some(out))
}

/// Reverse maps for every enum in `decls`, preceded by a `NULL` fallback.
pub fn render_enum_maps<S>(
    decls: &[EnumDecl],
    solver: &S,
    config: &EnumMapsConfig,
    emitted: &mut EmittedNames,
) -> Result<String>
where
    S: Solver + ?Sized,
{
    let mut out = String::from(NULL_PRELUDE);
    for decl in decls {
        if let Some(section) = render_enum_map(decl, solver, config, emitted)? {
            out.push_str(&section);
        }
    }
    info!(maps = emitted.len(), "Enum maps generated");
    Ok(out)
}
