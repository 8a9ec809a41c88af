//! Frozen per-module configuration.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A module's configuration record.
///
/// The record is fixed when the module is created; every context handed to
/// derive functions and hooks shares the same allocation.
///
/// # Example
///
/// ```
/// use ensemble_module::runtime::Runtime;
/// use serde::Deserialize;
/// use serde_json::json;
///
/// #[derive(Deserialize)]
/// struct Limits { max_items: u32 }
///
/// let runtime = Runtime::new();
/// let cart = runtime
///     .module("cart")
///     .with_config(json!({ "max_items": 10 }))
///     .build()
///     .unwrap();
///
/// assert_eq!(cart.config().get_as::<u32>("max_items"), Some(10));
/// assert_eq!(cart.config().parse::<Limits>().unwrap().max_items, 10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config(Arc<Map<String, Value>>);

impl Config {
    /// Creates an empty config.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(fields: Map<String, Value>) -> Self {
        Self(Arc::new(fields))
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deserializes the value stored under `key`.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0.get(key).and_then(|value| T::deserialize(value).ok())
    }

    /// Deserializes the whole record.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the record does not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }

    /// Returns true if the config has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies the record into a JSON object value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object((*self.0).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn config(value: Value) -> Config {
        match value {
            Value::Object(fields) => Config::from_map(fields),
            _ => Config::empty(),
        }
    }

    #[test]
    fn empty_config_has_no_fields() {
        let config = Config::empty();
        assert!(config.is_empty());
        assert_eq!(config.get("anything"), None);
    }

    #[test]
    fn typed_field_access() {
        let config = config(json!({ "retries": 3, "name": "svc" }));
        assert_eq!(config.get_as::<u8>("retries"), Some(3));
        assert_eq!(config.get_as::<String>("name"), Some("svc".to_string()));
        assert_eq!(config.get_as::<bool>("retries"), None);
    }

    #[test]
    fn parse_whole_record() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Settings {
            retries: u8,
            #[serde(default)]
            verbose: bool,
        }

        let config = config(json!({ "retries": 2 }));
        assert_eq!(
            config.parse::<Settings>().unwrap(),
            Settings {
                retries: 2,
                verbose: false
            }
        );
    }

    #[test]
    fn parse_reports_mismatch() {
        #[derive(Debug, Deserialize)]
        #[expect(dead_code, reason = "Only the failure of deserialization is observed")]
        struct Needs {
            required: String,
        }

        assert!(config(json!({})).parse::<Needs>().is_err());
    }
}
