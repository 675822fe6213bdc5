//! Single-map description files.
//!
//! A map spec names one lookup function and lists its rows. TOML is the
//! default format; files ending in `.json` are read as JSON.
//!
//! ```toml
//! name = "state_idx"
//!
//! [[rows]]
//! key = "RUNNING"
//! values = [1]
//!
//! [[rows]]
//! key = [[2, 0], "id"]
//! values = [{ raw = "ID_FLAG" }]
//! ```

use crate::core::error::{Error, InvalidRowError, Result};
use crate::map::{FunctionOptions, Header, Key, KeyPart, Row, TrainingSet, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One lookup function to generate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSpec {
    /// Function name
    pub name: String,

    /// Return type override
    #[serde(default)]
    pub ctype: Option<String>,

    /// No-match value override
    #[serde(default)]
    pub nomatch: Option<String>,

    /// Documentation comment emitted instead of the generated one
    #[serde(default)]
    pub header: Option<String>,

    /// Rows in table order
    pub rows: Vec<RowSpec>,
}

/// One row of a map spec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSpec {
    /// Key text or a list of key parts
    pub key: KeySpec,
    /// Payload values
    pub values: Vec<Value>,
}

/// Key as written in a map spec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySpec {
    /// Plain text key
    Text(String),
    /// Concatenated parts
    Parts(Vec<KeyPart>),
}

impl KeySpec {
    fn to_key(&self) -> Key {
        match self {
            KeySpec::Text(s) => Key::from(s.as_str()),
            KeySpec::Parts(parts) => Key::from_parts(parts),
        }
    }
}

impl MapSpec {
    /// Read a spec file, choosing the format by extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_toml(&contents)
        }
    }

    /// Parse a TOML spec
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::input(format!("Invalid map spec: {}", e)))
    }

    /// Parse a JSON spec
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| Error::input(format!("Invalid map spec: {}", e)))
    }

    /// Validated training set for the rows
    pub fn training_set(&self) -> std::result::Result<TrainingSet, InvalidRowError> {
        TrainingSet::from_rows(
            self.rows
                .iter()
                .map(|r| Row::new(r.key.to_key(), r.values.clone())),
        )
    }

    /// Function options; `header_comments` only matters without a custom header
    pub fn options(&self, header_comments: bool) -> FunctionOptions {
        let header = match (&self.header, header_comments) {
            (Some(custom), _) => Header::Custom(custom.clone()),
            (None, true) => Header::Generated,
            (None, false) => Header::Omitted,
        };
        FunctionOptions {
            output_ctype: self.ctype.clone(),
            nomatch: self.nomatch.clone(),
            header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TOML_SPEC: &str = r#"
        name = "state_idx"
        nomatch = "STATE_NONE"

        [[rows]]
        key = "RUNNING"
        values = [1]

        [[rows]]
        key = [[2, 0], "id", 9]
        values = [{ raw = "ID_FLAG" }]
    "#;

    #[test]
    fn parses_toml_rows() {
        let spec = MapSpec::from_toml(TOML_SPEC).unwrap();
        assert_eq!(spec.name, "state_idx");
        let set = spec.training_set().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows()[1].key.as_bytes(), &[2, 0, b'i', b'd', 9]);
        assert_eq!(set.rows()[1].payload, vec![Value::raw("ID_FLAG")]);

        let options = spec.options(false);
        assert_eq!(options.nomatch.as_deref(), Some("STATE_NONE"));
        assert_eq!(options.header, Header::Omitted);
        assert_eq!(spec.options(true).header, Header::Generated);
    }

    #[test]
    fn parses_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"name": "names", "header": "/// names", "rows": [{{"key": "a", "values": ["x", {{"bytes": [1, 65]}}]}}]}}"#
        )
        .unwrap();

        let spec = MapSpec::from_path(file.path()).unwrap();
        assert_eq!(spec.options(true).header, Header::Custom("/// names".into()));
        let set = spec.training_set().unwrap();
        assert_eq!(
            set.rows()[0].payload,
            vec![Value::from("x"), Value::Bytes { bytes: vec![1, 65] }]
        );
    }

    #[test]
    fn bad_rows_surface_as_row_errors() {
        let spec = MapSpec::from_toml(
            "name = \"m\"\n[[rows]]\nkey = \"A\"\nvalues = [1, 2]\n[[rows]]\nkey = \"B\"\nvalues = [3]\n",
        )
        .unwrap();
        assert!(matches!(
            spec.training_set(),
            Err(InvalidRowError::ArityMismatch { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(MapSpec::from_toml("rows = 3"), Err(Error::Input(_))));
    }
}
