// In crates/config-client/src/types.rs

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The value types the configuration service can serve.
pub const SUPPORTED_TYPES: [&str; 4] = ["string", "number", "boolean", "json"];

/// Checks a configuration key against the `segment(.segment)*` grammar:
/// each segment starts with a letter and contains only letters, digits,
/// and underscores.
pub fn is_valid_key(key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    key.split('.').all(|segment| {
        let mut chars = segment.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}

/// A configuration value with its metadata, immutable once fetched.
///
/// `value` is string-encoded on the wire regardless of `value_type`; the
/// typed accessors decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationValue {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub environment: Option<String>,
    pub last_updated: Option<String>,
    pub version: Option<String>,
}

impl ConfigurationValue {
    /// Whether this value is structurally sound: valid key, non-empty value,
    /// supported type.
    pub fn validate(&self) -> bool {
        is_valid_key(&self.key)
            && !self.value.is_empty()
            && SUPPORTED_TYPES.contains(&self.value_type.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn as_int(&self) -> Result<i64> {
        // Number values may be written as "42.0"; truncate like the service does.
        Ok(self.as_f64()? as i64)
    }

    pub fn as_f64(&self) -> Result<f64> {
        if self.value_type != "number" {
            return Err(self.mismatch("number"));
        }
        self.value.parse().map_err(|_| self.mismatch("number"))
    }

    pub fn as_bool(&self) -> Result<bool> {
        if self.value_type != "boolean" {
            return Err(self.mismatch("boolean"));
        }
        Ok(matches!(
            self.value.to_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ))
    }

    pub fn as_json(&self) -> Result<serde_json::Value> {
        if self.value_type != "json" {
            return Err(self.mismatch("json"));
        }
        serde_json::from_str(&self.value).map_err(|_| self.mismatch("json"))
    }

    fn mismatch(&self, wanted: &'static str) -> Error {
        Error::TypeMismatch {
            wanted,
            actual: self.value_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(key: &str, value: &str, value_type: &str) -> ConfigurationValue {
        ConfigurationValue {
            key: key.to_string(),
            value: value.to_string(),
            value_type: value_type.to_string(),
            environment: None,
            last_updated: None,
            version: None,
        }
    }

    #[test]
    fn accepts_well_formed_values() {
        assert!(value("a.b_c", "x", "string").validate());
        assert!(value("risk.position_limit", "1000000", "number").validate());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!value("a..b", "x", "string").validate());
        assert!(!value(".a", "x", "string").validate());
        assert!(!value("a.", "x", "string").validate());
        assert!(!value("", "x", "string").validate());
        assert!(!value("1a.b", "x", "string").validate());
        assert!(!value("a.b-c", "x", "string").validate());
    }

    #[test]
    fn rejects_empty_values_and_unsupported_types() {
        assert!(!value("a.b", "", "string").validate());
        assert!(!value("a.b", "x", "timestamp").validate());
    }

    #[test]
    fn typed_accessors_enforce_the_declared_type() {
        assert_eq!(value("k", "42.0", "number").as_int().unwrap(), 42);
        assert_eq!(value("k", "1.5", "number").as_f64().unwrap(), 1.5);
        assert!(value("k", "yes", "boolean").as_bool().unwrap());
        assert!(!value("k", "off", "boolean").as_bool().unwrap());
        assert_eq!(
            value("k", r#"{"a":1}"#, "json").as_json().unwrap()["a"],
            1
        );

        assert!(matches!(
            value("k", "42", "string").as_int(),
            Err(Error::TypeMismatch { wanted: "number", .. })
        ));
    }
}
