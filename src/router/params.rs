use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::types::{is_valid_class_name, is_valid_object_id};

pub type ParamValidator = fn(&str) -> bool;

/// Per-name checks applied to captured path parameters. Names without an
/// entry pass through unchanged.
static VALIDATORS: Lazy<HashMap<&'static str, ParamValidator>> = Lazy::new(|| {
    let mut validators: HashMap<&'static str, ParamValidator> = HashMap::new();
    validators.insert("className", is_valid_class_name);
    validators.insert("objectId", is_valid_object_id);
    validators
});

/// Returns the value if it passes the validator registered for `name`, `None` otherwise
pub fn validate_parameter(name: &str, value: String) -> Option<String> {
    match VALIDATORS.get(name) {
        Some(is_valid) if !is_valid(&value) => None,
        _ => Some(value),
    }
}

/// Path parameters of a matched route. A parameter that failed validation is
/// still listed, with no value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, Option<String>)>,
}

impl Params {
    pub fn from_captures(captures: Vec<(String, String)>) -> Self {
        let entries = captures
            .into_iter()
            .map(|(name, value)| {
                let value = validate_parameter(&name, value);
                (name, value)
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_table() {
        assert_eq!(validate_parameter("className", "_User".into()), Some("_User".into()));
        assert_eq!(validate_parameter("className", "1Bad".into()), None);
        assert_eq!(validate_parameter("objectId", "abc123".into()), Some("abc123".into()));
        assert_eq!(validate_parameter("objectId", "abc$%".into()), None);
        assert_eq!(validate_parameter("anything", "$%^".into()), Some("$%^".into()));
    }

    #[test]
    fn test_dropped_param_is_listed_without_value() {
        let params = Params::from_captures(vec![("objectId".into(), "a-b".into())]);
        assert!(params.contains("objectId"));
        assert_eq!(params.get("objectId"), None);
    }
}
