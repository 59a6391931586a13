// In-memory evaluation of parsed where clauses. Kept consistent with the JSONB
// predicates generated by `FilterWhere::generate`.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::types::{Condition, FilterOp};

impl Condition {
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        match self {
            Condition::And(parts) => parts.iter().all(|c| c.matches(record)),
            Condition::Or(parts) => parts.iter().any(|c| c.matches(record)),
            Condition::Field { path, operator, data } => {
                let field = lookup(record, path);
                match operator {
                    FilterOp::Eq => match field {
                        None => data.is_null(),
                        Some(value) => values_equal(value, data),
                    },
                    FilterOp::Ne => match field {
                        None => !data.is_null(),
                        Some(value) => !values_equal(value, data),
                    },
                    FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                        let Some(ordering) = field.and_then(|value| compare_values(value, data)) else {
                            return false;
                        };
                        match operator {
                            FilterOp::Gt => ordering == Ordering::Greater,
                            FilterOp::Gte => ordering != Ordering::Less,
                            FilterOp::Lt => ordering == Ordering::Less,
                            _ => ordering != Ordering::Greater,
                        }
                    }
                    FilterOp::In => {
                        let candidates = data.as_array().map(Vec::as_slice).unwrap_or_default();
                        field.is_some_and(|value| any_element_in(value, candidates))
                    }
                    FilterOp::NIn => {
                        let candidates = data.as_array().map(Vec::as_slice).unwrap_or_default();
                        field.map_or(true, |value| !any_element_in(value, candidates))
                    }
                    FilterOp::Exists => field.is_some() == data.as_bool().unwrap_or(true),
                }
            }
        }
    }
}

/// Resolve a dotted path inside a record
pub fn lookup<'a>(record: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = record.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Array fields match when any element is a candidate
fn any_element_in(value: &Value, candidates: &[Value]) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| candidates.iter().any(|c| values_equal(item, c))),
        _ => candidates.iter().any(|c| values_equal(value, c)),
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Order two values of the same kind: numbers, strings, or encoded dates.
/// Values of different kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Object(x), Value::Object(y)) => {
            let (x_iso, y_iso) = (x.get("iso")?.as_str()?, y.get("iso")?.as_str()?);
            Some(x_iso.cmp(y_iso))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterWhere;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn matches(where_clause: Value, value: Value) -> bool {
        FilterWhere::parse(&where_clause).unwrap().matches(&record(value))
    }

    #[test]
    fn test_equality_and_missing_fields() {
        assert!(matches(json!({ "username": "alice" }), json!({ "username": "alice" })));
        assert!(!matches(json!({ "username": "alice" }), json!({ "username": "bob" })));
        assert!(matches(json!({ "email": null }), json!({ "username": "bob" })));
        assert!(matches(json!({ "count": 1 }), json!({ "count": 1.0 })));
    }

    #[test]
    fn test_exists() {
        let where_clause = json!({ "_failed_login_count": { "$exists": true } });
        assert!(matches(where_clause.clone(), json!({ "_failed_login_count": 0 })));
        assert!(!matches(where_clause, json!({ "username": "a" })));
        assert!(matches(
            json!({ "_failed_login_count": { "$exists": false } }),
            json!({ "username": "a" })
        ));
    }

    #[test]
    fn test_ordering_requires_same_kind() {
        let where_clause = json!({ "_failed_login_count": { "$gte": 3 } });
        assert!(matches(where_clause.clone(), json!({ "_failed_login_count": 3 })));
        assert!(!matches(where_clause.clone(), json!({ "_failed_login_count": 2 })));
        assert!(!matches(where_clause.clone(), json!({ "_failed_login_count": "9" })));
        assert!(!matches(where_clause, json!({})));
    }

    #[test]
    fn test_date_comparison() {
        let later = json!({ "__type": "Date", "iso": "2024-05-01T10:15:00.000Z" });
        let earlier = json!({ "__type": "Date", "iso": "2024-05-01T10:00:00.000Z" });
        assert!(matches(
            json!({ "_account_lockout_expires_at": { "$gt": earlier.clone() } }),
            json!({ "_account_lockout_expires_at": later.clone() })
        ));
        assert!(!matches(
            json!({ "_account_lockout_expires_at": { "$gt": later } }),
            json!({ "_account_lockout_expires_at": earlier })
        ));
    }

    #[test]
    fn test_or_in_nin_and_nested_paths() {
        let where_clause = json!({ "$or": [{ "username": "bob" }, { "email": "bob" }] });
        assert!(matches(where_clause.clone(), json!({ "username": "x", "email": "bob" })));
        assert!(!matches(where_clause, json!({ "username": "x", "email": "y" })));

        assert!(matches(json!({ "channels": { "$in": ["a", "b"] } }), json!({ "channels": "b" })));
        assert!(matches(json!({ "channels": { "$in": ["news"] } }), json!({ "channels": ["sports", "news"] })));
        assert!(!matches(json!({ "channels": { "$nin": ["news"] } }), json!({ "channels": ["news"] })));
        assert!(matches(json!({ "channels": { "$nin": ["a"] } }), json!({})));
        assert!(matches(json!({ "params.color": "red" }), json!({ "params": { "color": "red" } })));
    }
}
