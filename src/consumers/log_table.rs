//! Logging key/value staging table.
//!
//! The standard log keys come from one enum whose labels look like `K_name`.
//! The generated header holds a statically allocated table with one slot per
//! standard key followed by a fixed number of ad-hoc slots, and a lookup from
//! a size-prefixed key buffer to its slot index.

use crate::consumers::enum_scan::{scan, EnumDecl};
use crate::consumers::include_guard;
use crate::core::config::LogTableConfig;
use crate::core::error::{Error, InvalidRowError, Result};
use crate::map::input::c_escape;
use crate::map::{generate, FunctionOptions, Header, Row, Solver, TrainingSet, Value};
use std::fmt::Write as _;
use tracing::info;

/// One staging-table slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogKey {
    /// Key name without the `K_` prefix; `None` for ad-hoc slots
    pub label: Option<String>,
    /// Value staged before anything is logged
    pub default: Option<String>,
}

/// Slots for `decl` followed by `config.adhoc_slots` empty ones.
pub fn standard_keys(decl: &EnumDecl, config: &LogTableConfig) -> Vec<LogKey> {
    let mut keys: Vec<LogKey> = decl
        .entries
        .iter()
        .map(|entry| {
            let label = entry
                .label
                .strip_prefix("K_")
                .filter(|l| {
                    !l.is_empty()
                        && l.bytes()
                            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
                })
                .map(str::to_string);
            let default = label
                .as_ref()
                .and_then(|l| config.defaults.get(l))
                .cloned();
            LogKey { label, default }
        })
        .collect();
    keys.resize(keys.len() + config.adhoc_slots, LogKey::default());
    keys
}

fn size_expr(s: Option<&str>) -> String {
    format!("{:<3} + 1 + sizeof(kv_head_t)", s.map_or(0, str::len))
}

fn quoted(s: Option<&str>) -> String {
    match s {
        Some(s) => format!("{:<14}", format!("\"{}\"", c_escape(s.as_bytes()))),
        None => "_GX_NULLSTRING".to_string(),
    }
}

fn head_size(s: Option<&str>, with_default: bool) -> &'static str {
    if with_default && s.is_some() {
        "sizeof(kv_head_t)"
    } else {
        "0"
    }
}

fn data_size(s: Option<&str>, with_default: bool) -> String {
    match s {
        Some(s) if with_default => (s.len() + 1).to_string(),
        _ => "0".to_string(),
    }
}

/// The `ADHOC_OFFSET`/`KV_ENTRIES` constants and the three master tables.
///
/// Head and data sizes are only filled in for keys that carry a default;
/// every other slot is sized at log time.
pub fn staging_table(keys: &[LogKey], adhoc_slots: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#define ADHOC_OFFSET {}", keys.len().saturating_sub(adhoc_slots));
    let _ = writeln!(out, "#define KV_ENTRIES   {}", keys.len());
    out.push('\n');

    let key_sizes: Vec<String> = keys.iter().map(|k| size_expr(k.label.as_deref())).collect();
    let _ = writeln!(
        out,
        "static kv_head_t _key_sizes_master[] = {{\n    {}\n}};",
        key_sizes.join(",\n    ")
    );
    let val_sizes: Vec<String> = keys.iter().map(|k| size_expr(k.default.as_deref())).collect();
    let _ = writeln!(
        out,
        "static kv_head_t _val_sizes_master[] = {{\n    {}\n}};",
        val_sizes.join(",\n    ")
    );

    let rows: Vec<String> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| {
            let label = k.label.as_deref();
            let default = k.default.as_deref();
            let has_default = default.is_some();
            format!(
                "{{&(_key_sizes_master[{i:>2}]), {}, {}, {}, &(_val_sizes_master[{i:>2}]), {}, {}, {}}}",
                head_size(label, has_default),
                quoted(label),
                data_size(label, has_default),
                head_size(default, has_default),
                quoted(default),
                data_size(default, has_default),
                i = i
            )
        })
        .collect();
    let _ = writeln!(
        out,
        "static _gx_kv msg_tab_master[] = {{\n    {}\n}};",
        rows.join(",\n    ")
    );
    out
}

/// Lookup rows: each standard key, prefixed by its length as a little-endian
/// `u16`, maps to its slot index.
pub fn key_rows(keys: &[LogKey]) -> std::result::Result<TrainingSet, InvalidRowError> {
    let mut set = TrainingSet::new();
    for (index, key) in keys.iter().enumerate() {
        let Some(label) = &key.label else {
            continue;
        };
        let mut bytes = (label.len() as u16).to_le_bytes().to_vec();
        bytes.extend_from_slice(label.as_bytes());
        set.push(Row::new(bytes, vec![Value::Int(index as i64)]))?;
    }
    Ok(set)
}

/// Generate the staging-table header from preprocessed header text.
pub fn render_log_table<S>(
    src: &str,
    solver: &S,
    config: &LogTableConfig,
    header_comments: bool,
) -> Result<String>
where
    S: Solver + ?Sized,
{
    let decl = scan(src)
        .into_iter()
        .find(|d| d.name == config.enum_name)
        .ok_or_else(|| Error::input(format!("{} enum not found", config.enum_name)))?;

    let keys = standard_keys(&decl, config);
    let rows = key_rows(&keys)?;
    if rows.is_empty() {
        return Err(Error::input(format!(
            "{} has no K_ labels to stage",
            config.enum_name
        )));
    }

    let options = FunctionOptions {
        output_ctype: Some("int".to_string()),
        nomatch: None,
        header: if header_comments {
            Header::Generated
        } else {
            Header::Omitted
        },
    };
    let map = generate(&config.lookup_name, &rows, solver, &options)?;
    info!(
        standard = rows.len(),
        adhoc = config.adhoc_slots,
        "Log staging table generated"
    );

    let guard = format!("_{}_TABLE", include_guard(&config.enum_name));
    let mut out = format!("#ifndef {}\n#define {}\n\n", guard, guard);
    out.push_str(&staging_table(&keys, config.adhoc_slots));
    out.push('\n');
    out.push_str(map.text());
    let _ = writeln!(out, "\n#endif /* {} */", guard);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::parser::{self, tests::{sample_output, SampleOutput}};
    use crate::map::SolverResult;

    const HEADER: &str = "typedef enum gx_log_standard_keys { K_type = 0, K_severity, K_msg, K_END } gx_log_standard_keys;";

    fn config(adhoc_slots: usize) -> LogTableConfig {
        LogTableConfig {
            adhoc_slots,
            ..LogTableConfig::default()
        }
    }

    fn keys_output() -> String {
        let mut asso = vec![10u32; 256];
        for b in [b't', b's', b'm'] {
            asso[b as usize] = 0;
        }
        sample_output(SampleOutput {
            positions: "3",
            total: 3,
            min_len: 5,
            max_len: 10,
            min_hash: 5,
            max_hash: 10,
            asso: Some(&asso),
            calc: "  return len + asso_values[(unsigned char)str[2]];",
            wordlist: "    {(char*)0}, {(char*)0}, {(char*)0}, {(char*)0}, {(char*)0},\n    {\"\\003\\000msg\",2}, {\"\\004\\000type\",0},\n    {(char*)0}, {(char*)0}, {(char*)0}, {\"\\010\\000severity\",1}",
        })
    }

    #[test]
    fn standard_keys_take_defaults() {
        let decl = scan(HEADER).remove(0);
        let keys = standard_keys(&decl, &config(2));
        assert_eq!(keys.len(), 6);
        assert_eq!(keys[0].label.as_deref(), Some("type"));
        assert_eq!(keys[0].default.as_deref(), Some("unknown"));
        assert_eq!(keys[1].default.as_deref(), Some("SEV_UNKNOWN"));
        assert_eq!(keys[2].default, None);
        assert_eq!(keys[3].label, None, "K_END is not a key");
        assert_eq!(keys[5], LogKey::default());
    }

    #[test]
    fn staging_table_layout() {
        let decl = scan(HEADER).remove(0);
        let keys = standard_keys(&decl, &config(2));
        let table = staging_table(&keys, 2);

        assert!(table.starts_with("#define ADHOC_OFFSET 4\n#define KV_ENTRIES   6\n\n"));
        assert!(table.contains("static kv_head_t _key_sizes_master[] = {\n    4   + 1 + sizeof(kv_head_t),\n"));
        assert!(table.contains(
            "{&(_key_sizes_master[ 0]), sizeof(kv_head_t), \"type\"        , 5, &(_val_sizes_master[ 0]), sizeof(kv_head_t), \"unknown\"     , 8}"
        ));
        assert!(table.contains(
            "{&(_key_sizes_master[ 2]), 0, \"msg\"         , 0, &(_val_sizes_master[ 2]), 0, _GX_NULLSTRING, 0}"
        ));
        assert!(table.contains(
            "{&(_key_sizes_master[ 5]), 0, _GX_NULLSTRING, 0, &(_val_sizes_master[ 5]), 0, _GX_NULLSTRING, 0}\n};"
        ));
    }

    #[test]
    fn lookup_keys_carry_size_prefix() {
        let keys = vec![
            LogKey { label: Some("ab".into()), default: None },
            LogKey::default(),
            LogKey { label: Some("xyz".into()), default: None },
        ];
        let rows = key_rows(&keys).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows()[0].key.as_bytes(), &[2, 0, b'a', b'b']);
        assert_eq!(rows.rows()[1].payload, vec![Value::Int(2)]);
    }

    #[test]
    fn renders_table_and_lookup() {
        let raw = keys_output();
        let solver = move |_: &TrainingSet| -> Result<SolverResult> { Ok(parser::parse(&raw)?) };
        let out = render_log_table(HEADER, &solver, &config(2), true).unwrap();

        assert!(out.starts_with("#ifndef _GX_LOG_STANDARD_KEYS_TABLE\n"));
        assert!(out.contains("#define KV_ENTRIES   6"));
        assert!(out.contains("int _gx_log_key_idx(register const char *buf)"));
        assert!(out.contains("register unsigned int len = ((unsigned char *)buf)[0] + 2;"));
        assert!(out.trim_end().ends_with("#endif /* _GX_LOG_STANDARD_KEYS_TABLE */"));
    }

    #[test]
    fn missing_enum_is_an_input_error() {
        let solver = |_: &TrainingSet| -> Result<SolverResult> { panic!("solver must not run") };
        let err = render_log_table("typedef enum other { A } other;", &solver, &config(1), true).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }
}
