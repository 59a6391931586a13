pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::filter::{FilterError, FilterWhere, FindOptions};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A stored object: a JSON document keyed by field name
pub type Record = Map<String, Value>;

/// Errors from the backing store
#[derive(Debug, Error)]
pub enum StoreError {
    /// An update or delete matched zero records
    #[error("Object not found.")]
    ObjectNotFound,

    #[error("invalid className: {0}")]
    InvalidClassName(String),

    #[error("Duplicate value: {0}")]
    Duplicate(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// One field mutation inside an update
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    /// Atomic delta applied by the store
    Increment(i64),
    Delete,
}

/// Ordered set of field mutations; keys may be dotted paths (`params.color`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    fields: Vec<(Vec<String>, FieldUpdate)>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(self, key: &str, value: Value) -> Self {
        self.with(key, FieldUpdate::Set(value))
    }

    pub fn increment(self, key: &str, amount: i64) -> Self {
        self.with(key, FieldUpdate::Increment(amount))
    }

    pub fn unset(self, key: &str) -> Self {
        self.with(key, FieldUpdate::Delete)
    }

    fn with(mut self, key: &str, update: FieldUpdate) -> Self {
        self.fields.push((key.split('.').map(str::to_string).collect(), update));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[String], &FieldUpdate)> {
        self.fields.iter().map(|(path, update)| (path.as_slice(), update))
    }

    /// Parse a REST update body, honouring `{"__op": "Increment" | "Delete"}` operators
    pub fn from_json(body: &Map<String, Value>) -> Result<Self, StoreError> {
        let mut update_set = Self::new();
        for (key, value) in body {
            let path = FilterWhere::parse_path(key)?;
            let update = match value.get("__op").and_then(Value::as_str) {
                Some("Increment") => {
                    let amount = value
                        .get("amount")
                        .and_then(Value::as_i64)
                        .ok_or_else(|| StoreError::InvalidUpdate(format!("Increment on {} requires an integer amount", key)))?;
                    FieldUpdate::Increment(amount)
                }
                Some("Delete") => FieldUpdate::Delete,
                Some(op) => return Err(StoreError::InvalidUpdate(format!("unsupported operator {}", op))),
                None => FieldUpdate::Set(value.clone()),
            };
            update_set.fields.push((path, update));
        }
        Ok(update_set)
    }

    /// Apply the mutations to an in-memory record
    pub fn apply(&self, record: &mut Record) -> Result<(), StoreError> {
        for (path, update) in &self.fields {
            let Some((last, parents)) = path.split_last() else { continue };
            let mut target = &mut *record;
            for segment in parents {
                let entry = target
                    .entry(segment.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                target = match entry.as_object_mut() {
                    Some(map) => map,
                    None => return Err(StoreError::InvalidUpdate(segment.clone())),
                };
            }
            match update {
                FieldUpdate::Set(value) => {
                    target.insert(last.clone(), value.clone());
                }
                FieldUpdate::Delete => {
                    target.remove(last);
                }
                FieldUpdate::Increment(amount) => {
                    let current = match target.get(last) {
                        None | Some(Value::Null) => 0,
                        Some(value) => value.as_i64().ok_or_else(|| {
                            StoreError::InvalidUpdate(format!("cannot increment non-integer field {}", last))
                        })?,
                    };
                    target.insert(last.clone(), json!(current + amount));
                }
            }
        }
        Ok(())
    }
}

/// Narrow interface to the object database.
///
/// `update` and `destroy` report `StoreError::ObjectNotFound` when the query
/// matches nothing; callers decide whether that outcome is benign.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find(&self, class_name: &str, query: &Value, options: &FindOptions) -> Result<Vec<Record>, StoreError>;

    /// Insert a record, assigning `objectId`, `createdAt` and `updatedAt` when absent
    async fn create(&self, class_name: &str, record: Record) -> Result<Record, StoreError>;

    /// Update the first record matching `query`
    async fn update(&self, class_name: &str, query: &Value, update: &RecordUpdate) -> Result<(), StoreError>;

    /// Update the first match, or create a record from the query's equality fields plus the update
    async fn upsert(&self, class_name: &str, query: &Value, update: &RecordUpdate) -> Result<(), StoreError>;

    /// Delete every matching record, returning how many were removed
    async fn destroy(&self, class_name: &str, query: &Value) -> Result<u64, StoreError>;

    /// Drop every record of a class
    async fn purge_collection(&self, class_name: &str) -> Result<(), StoreError>;

    async fn aggregate(
        &self,
        class_name: &str,
        _where_clause: &Value,
        _pipeline: &[Value],
        _distinct: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        Err(StoreError::Unsupported(format!("aggregate on {}", class_name)))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Encode a timestamp the way stored date fields are represented
pub fn encode_date(at: DateTime<Utc>) -> Value {
    json!({ "__type": "Date", "iso": iso_string(at) })
}

/// Accepts an encoded date object or a bare ISO-8601 string
pub fn decode_date(value: &Value) -> Option<DateTime<Utc>> {
    let iso = match value {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj.get("iso")?.as_str()?,
        _ => return None,
    };
    DateTime::parse_from_rfc3339(iso).ok().map(|dt| dt.with_timezone(&Utc))
}

pub fn iso_string(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Ten character alphanumeric object id
pub fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

/// Equality fields of a query, used to seed upserted records
pub(crate) fn equality_fields(query: &Value) -> Record {
    query
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(k, v)| !k.starts_with('$') && !v.as_object().is_some_and(|o| o.keys().any(|k| k.starts_with('$'))))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_update() {
        let mut record: Record = json!({ "username": "alice", "count": 2, "old": true })
            .as_object()
            .cloned()
            .unwrap();
        RecordUpdate::new()
            .increment("count", 1)
            .increment("fresh", 1)
            .set("params.color", json!("red"))
            .unset("old")
            .apply(&mut record)
            .unwrap();
        assert_eq!(record["count"], json!(3));
        assert_eq!(record["fresh"], json!(1));
        assert_eq!(record["params"], json!({ "color": "red" }));
        assert!(!record.contains_key("old"));
    }

    #[test]
    fn test_increment_non_integer_fails() {
        let mut record: Record = json!({ "count": "x" }).as_object().cloned().unwrap();
        assert!(RecordUpdate::new().increment("count", 1).apply(&mut record).is_err());
    }

    #[test]
    fn test_from_json_operators() {
        let body = json!({
            "_failed_login_count": { "__op": "Increment", "amount": 1 },
            "sessionToken": { "__op": "Delete" },
            "name": "x"
        });
        let spec = RecordUpdate::from_json(body.as_object().unwrap()).unwrap();
        let updates: Vec<_> = spec.iter().map(|(_, u)| u.clone()).collect();
        assert!(updates.contains(&FieldUpdate::Increment(1)));
        assert!(updates.contains(&FieldUpdate::Delete));
        assert!(updates.contains(&FieldUpdate::Set(json!("x"))));
    }

    #[test]
    fn test_date_round_trip_precision() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:15:30.250Z").unwrap().with_timezone(&Utc);
        let encoded = encode_date(at);
        assert_eq!(encoded["iso"], "2024-05-01T10:15:30.250Z");
        assert_eq!(decode_date(&encoded), Some(at));
    }

    #[test]
    fn test_object_id_shape() {
        let id = new_object_id();
        assert_eq!(id.len(), 10);
        assert!(crate::types::is_valid_object_id(&id));
    }
}
