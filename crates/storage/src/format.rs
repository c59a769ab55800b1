//! Record payload formats
//!
//! The format is chosen by file extension. JSON is the default; TOML is
//! available for hand-edited data (TOML has no null, so records holding
//! `Value::Null` cannot be written as TOML).

use flexdb_core::{Error, Map, Record, Result, Value};
use serde::{Deserialize, Serialize};

/// Payload encoding for stored records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formatter {
    /// Pretty-printed JSON (`.json`)
    #[default]
    Json,
    /// TOML (`.toml`)
    Toml,
}

impl Formatter {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Formatter::Json => "json",
            Formatter::Toml => "toml",
        }
    }

    /// Formatter for a file extension (with or without the leading dot)
    pub fn from_extension(ext: &str) -> Option<Formatter> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "json" => Some(Formatter::Json),
            "toml" => Some(Formatter::Toml),
            _ => None,
        }
    }

    /// Encode record fields; storage metadata is never written
    ///
    /// NaN and infinities have no representation in either format and are
    /// rejected.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        check_finite(record.fields(), "")?;
        match self {
            Formatter::Json => {
                let mut bytes = serde_json::to_vec_pretty(record.fields())?;
                bytes.push(b'\n');
                Ok(bytes)
            }
            Formatter::Toml => toml::to_string_pretty(record.fields())
                .map(String::into_bytes)
                .map_err(|e| Error::Serialization(format!("toml encode: {}", e))),
        }
    }

    /// Decode a payload; the top level must be a map
    pub fn decode(&self, bytes: &[u8]) -> Result<Record> {
        let fields: Map = match self {
            Formatter::Json => serde_json::from_slice(bytes)?,
            Formatter::Toml => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| Error::Serialization(format!("toml decode: {}", e)))?;
                toml::from_str(text).map_err(|e| Error::Serialization(format!("toml decode: {}", e)))?
            }
        };
        Ok(Record::from_map(fields))
    }
}

fn check_finite(fields: &Map, prefix: &str) -> Result<()> {
    for (name, value) in fields {
        check_value(value, &format!("{}{}", prefix, name))?;
    }
    Ok(())
}

fn check_value(value: &Value, path: &str) -> Result<()> {
    match value {
        Value::Float(f) if !f.is_finite() => Err(Error::Serialization(format!(
            "field '{}' holds non-finite number {}",
            path, f
        ))),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| check_value(item, &format!("{}.{}", path, i))),
        Value::Object(map) => check_finite(map, &format!("{}.", path)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::new()
            .with("name", "Alice")
            .with("age", 30)
            .with("score", 1.5)
            .with("tags", Value::Array(vec![Value::from("a"), Value::from("b")]))
    }

    #[test]
    fn test_json_round_trip() {
        let bytes = Formatter::Json.encode(&sample()).unwrap();
        assert_eq!(Formatter::Json.decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_toml_round_trip() {
        let bytes = Formatter::Toml.encode(&sample()).unwrap();
        assert_eq!(Formatter::Toml.decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_json_rejects_non_object() {
        assert!(matches!(
            Formatter::Json.decode(b"[1, 2]"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(Formatter::from_extension(".JSON"), Some(Formatter::Json));
        assert_eq!(Formatter::from_extension("toml"), Some(Formatter::Toml));
        assert_eq!(Formatter::from_extension("yaml"), None);
    }

    #[test]
    fn test_non_finite_floats_are_rejected() {
        let nested = Record::new().with("scores", Value::Array(vec![Value::Float(1.0), Value::Float(f64::NAN)]));
        for formatter in [Formatter::Json, Formatter::Toml] {
            match formatter.encode(&nested) {
                Err(Error::Serialization(msg)) => assert!(msg.contains("scores.1"), "{msg}"),
                other => panic!("expected serialization error, got {other:?}"),
            }
        }
        let inf = Record::new().with("limit", f64::INFINITY);
        assert!(Formatter::Json.encode(&inf).is_err());
    }
}
