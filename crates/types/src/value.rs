//! The recursive header-value AST.
//!
//! Header values form a sum of string, list and map. The same AST backs
//! wire-format parsing, plug/slot rule compilation and the sign tool's
//! JSON/YAML statement handling, so structured headers are never
//! re-parsed from strings downstream.

use std::collections::BTreeMap;

use thiserror::Error;

/// A single header value: a string, a list of values, or a nested map.
///
/// Maps are `BTreeMap`s so nested structures always serialize with
/// lexicographic key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// A scalar value. The wire format is stringly typed; numbers and
    /// booleans are represented by their literal spelling.
    Str(String),
    /// An ordered list of values.
    List(Vec<HeaderValue>),
    /// A nested mapping.
    Map(BTreeMap<String, HeaderValue>),
}

/// A full header mapping, as carried by an assertion.
pub type Headers = BTreeMap<String, HeaderValue>;

/// Errors converting foreign document values into header values.
#[derive(Debug, Error)]
pub enum ValueError {
    /// JSON `null` has no header-value representation.
    #[error("null is not a valid header value")]
    Null,
    /// Map keys must be strings.
    #[error("map keys must be strings")]
    NonStringKey,
}

impl HeaderValue {
    /// Returns the scalar string, if this value is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the list items, if this value is a list.
    pub fn as_list(&self) -> Option<&[HeaderValue]> {
        match self {
            HeaderValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Returns the nested map, if this value is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, HeaderValue>> {
        match self {
            HeaderValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the items as plain strings if this is a list of scalars.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        let items = self.as_list()?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(item.as_str()?.to_string());
        }
        Some(out)
    }

    /// Builds a header value from a JSON document value.
    ///
    /// Numbers and booleans become their literal spelling, matching how
    /// the sign tool's statements are folded into headers. `null` is
    /// rejected.
    pub fn from_json(v: &serde_json::Value) -> Result<HeaderValue, ValueError> {
        match v {
            serde_json::Value::Null => Err(ValueError::Null),
            serde_json::Value::Bool(b) => Ok(HeaderValue::Str(b.to_string())),
            serde_json::Value::Number(n) => Ok(HeaderValue::Str(n.to_string())),
            serde_json::Value::String(s) => Ok(HeaderValue::Str(s.clone())),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(HeaderValue::from_json(item)?);
                }
                Ok(HeaderValue::List(out))
            }
            serde_json::Value::Object(obj) => {
                let mut out = BTreeMap::new();
                for (k, item) in obj {
                    out.insert(k.clone(), HeaderValue::from_json(item)?);
                }
                Ok(HeaderValue::Map(out))
            }
        }
    }

    /// Converts the value back into a JSON document value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            HeaderValue::Str(s) => serde_json::Value::String(s.clone()),
            HeaderValue::List(items) => {
                serde_json::Value::Array(items.iter().map(HeaderValue::to_json).collect())
            }
            HeaderValue::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> HeaderValue {
        HeaderValue::Str(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> HeaderValue {
        HeaderValue::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_scalars() {
        let v = HeaderValue::from_json(&json!("abc")).unwrap();
        assert_eq!(v, HeaderValue::Str("abc".into()));

        let v = HeaderValue::from_json(&json!(42)).unwrap();
        assert_eq!(v, HeaderValue::Str("42".into()));

        let v = HeaderValue::from_json(&json!(true)).unwrap();
        assert_eq!(v, HeaderValue::Str("true".into()));

        assert!(HeaderValue::from_json(&json!(null)).is_err());
    }

    #[test]
    fn from_json_nested() {
        let v = HeaderValue::from_json(&json!({"b": ["x", "y"], "a": "1"})).unwrap();
        let m = v.as_map().unwrap();
        assert_eq!(m["a"], HeaderValue::Str("1".into()));
        assert_eq!(
            m["b"].as_string_list().unwrap(),
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn string_list_rejects_nesting() {
        let v = HeaderValue::List(vec![HeaderValue::List(vec![])]);
        assert!(v.as_string_list().is_none());
    }
}
