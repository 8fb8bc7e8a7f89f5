use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AlignError, Result};

/// A single parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Whole numbers only; `3.0` is accepted, `3.5` is not.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            ParamValue::Float(_) => None,
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Flat, ordered key/value parameter store. Keys are `:`-separated paths
/// such as `pair_finder:tolerance:RT`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Param {
    values: BTreeMap<String, ParamValue>,
}

impl Param {
    pub fn new() -> Self {
        Param::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    /// Numeric value of `key`, `default` if absent.
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| AlignError::invalid(key, format!("expected a number, got '{}'", value))),
        }
    }

    /// Non-negative integer value of `key`, `default` if absent.
    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key) {
            None => Ok(default),
            Some(_) => self.require_usize(key),
        }
    }

    /// Non-negative integer value of `key`; `ElementNotFound` if absent.
    pub fn require_usize(&self, key: &str) -> Result<usize> {
        let value = self.get(key).ok_or_else(|| AlignError::ElementNotFound(key.to_string()))?;
        value
            .as_i64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| {
                AlignError::invalid(key, format!("expected a non-negative integer, got '{}'", value))
            })
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_str()
                .ok_or_else(|| AlignError::invalid(key, format!("expected a string, got '{}'", value))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_values_keep_their_kind() {
        let param = Param::from_json_str(
            r#"{"number_buckets:RT": 4, "pair_finder:tolerance:MZ": 0.25, "algorithm": "simple"}"#,
        )
        .unwrap();
        assert_eq!(param.get("number_buckets:RT"), Some(&ParamValue::Int(4)));
        assert_eq!(param.get("pair_finder:tolerance:MZ"), Some(&ParamValue::Float(0.25)));
        assert_eq!(param.str_or("algorithm", "geomhash_shift").unwrap(), "simple");
        assert_eq!(Param::from_json_str(&param.to_json_string().unwrap()).unwrap(), param);
    }

    #[test]
    fn test_typed_access() {
        let mut param = Param::new();
        param.set("a", 3).set("b", 2.0).set("c", "7").set("d", -1).set("e", 2.5);

        assert_eq!(param.require_usize("a").unwrap(), 3);
        assert_eq!(param.require_usize("b").unwrap(), 2);
        assert_eq!(param.require_usize("c").unwrap(), 7);
        assert!(matches!(param.require_usize("d"), Err(AlignError::InvalidParameter { .. })));
        assert!(matches!(param.require_usize("e"), Err(AlignError::InvalidParameter { .. })));
        assert!(matches!(param.require_usize("missing"), Err(AlignError::ElementNotFound(_))));

        assert_eq!(param.f64_or("a", 0.0).unwrap(), 3.0);
        assert_eq!(param.f64_or("missing", 1.5).unwrap(), 1.5);
        assert_eq!(param.usize_or("missing", 9).unwrap(), 9);
        assert!(param.str_or("a", "x").is_err());

        assert_eq!(param.remove("a"), Some(ParamValue::Int(3)));
        assert!(!param.contains("a"));
        assert_eq!(param.len(), 4);
    }
}
