use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{equality_fields, iso_string, new_object_id, Record, Store, StoreError, RecordUpdate};
use crate::filter::{matcher::values_equal, FilterOrder, FilterWhere, FindOptions};
use crate::types::is_valid_class_name;

/// Process-local store. Each collection is an insertion-ordered list of records
/// guarded by one lock, so every single call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_class(class_name: &str) -> Result<(), StoreError> {
        if is_valid_class_name(class_name) {
            Ok(())
        } else {
            Err(StoreError::InvalidClassName(class_name.to_string()))
        }
    }

    fn touch(record: &mut Record) {
        record.insert("updatedAt".to_string(), json!(iso_string(Utc::now())));
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find(&self, class_name: &str, query: &Value, options: &FindOptions) -> Result<Vec<Record>, StoreError> {
        Self::check_class(class_name)?;
        let condition = FilterWhere::parse(query)?;
        let order = match &options.order {
            Some(order) => FilterOrder::validate_and_parse(order)?,
            None => vec![],
        };

        let collections = self.collections.read().await;
        let mut results: Vec<Record> = collections
            .get(class_name)
            .map(|records| records.iter().filter(|r| condition.matches(r)).cloned().collect())
            .unwrap_or_default();
        drop(collections);

        FilterOrder::sort(&mut results, &order);
        let skip = options.skip.unwrap_or(0);
        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(results.into_iter().skip(skip).take(limit).collect())
    }

    async fn create(&self, class_name: &str, mut record: Record) -> Result<Record, StoreError> {
        Self::check_class(class_name)?;
        let now = json!(iso_string(Utc::now()));
        record.entry("objectId".to_string()).or_insert_with(|| json!(new_object_id()));
        record.entry("createdAt".to_string()).or_insert_with(|| now.clone());
        record.entry("updatedAt".to_string()).or_insert(now);

        let mut collections = self.collections.write().await;
        let records = collections.entry(class_name.to_string()).or_default();
        if records.iter().any(|r| r.get("objectId") == record.get("objectId")) {
            return Err(StoreError::Duplicate(format!("objectId already exists in {}", class_name)));
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn update(&self, class_name: &str, query: &Value, update: &RecordUpdate) -> Result<(), StoreError> {
        Self::check_class(class_name)?;
        let condition = FilterWhere::parse(query)?;

        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(class_name)
            .and_then(|records| records.iter_mut().find(|r| condition.matches(r)))
            .ok_or(StoreError::ObjectNotFound)?;

        // Apply to a copy so a failing mutation leaves the record untouched
        let mut updated = record.clone();
        update.apply(&mut updated)?;
        Self::touch(&mut updated);
        *record = updated;
        Ok(())
    }

    async fn upsert(&self, class_name: &str, query: &Value, update: &RecordUpdate) -> Result<(), StoreError> {
        match self.update(class_name, query, update).await {
            Err(StoreError::ObjectNotFound) => {
                let mut record = equality_fields(query);
                update.apply(&mut record)?;
                self.create(class_name, record).await.map(|_| ())
            }
            other => other,
        }
    }

    async fn destroy(&self, class_name: &str, query: &Value) -> Result<u64, StoreError> {
        Self::check_class(class_name)?;
        let condition = FilterWhere::parse(query)?;

        let mut collections = self.collections.write().await;
        let Some(records) = collections.get_mut(class_name) else { return Ok(0) };
        let before = records.len();
        records.retain(|r| !condition.matches(r));
        Ok((before - records.len()) as u64)
    }

    async fn purge_collection(&self, class_name: &str) -> Result<(), StoreError> {
        Self::check_class(class_name)?;
        let mut collections = self.collections.write().await;
        match collections.get_mut(class_name) {
            Some(records) => {
                records.clear();
                Ok(())
            }
            None => Err(StoreError::ObjectNotFound),
        }
    }

    async fn aggregate(
        &self,
        class_name: &str,
        where_clause: &Value,
        pipeline: &[Value],
        distinct: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let records = self.find(class_name, where_clause, &FindOptions::default()).await?;
        let mut rows: Vec<Value> = records.into_iter().map(Value::Object).collect();

        for stage in pipeline {
            let Some((name, spec)) = stage.as_object().and_then(|s| s.iter().next()) else {
                return Err(StoreError::Unsupported("empty pipeline stage".to_string()));
            };
            rows = match name.as_str() {
                "$match" => {
                    let condition = FilterWhere::parse(spec)?;
                    rows.into_iter()
                        .filter(|row| row.as_object().is_some_and(|r| condition.matches(r)))
                        .collect()
                }
                "$skip" => rows.into_iter().skip(spec.as_u64().unwrap_or(0) as usize).collect(),
                "$limit" => rows.into_iter().take(spec.as_u64().unwrap_or(u64::MAX) as usize).collect(),
                "$count" => {
                    let field = spec.as_str().unwrap_or("count");
                    vec![json!({ field: rows.len() })]
                }
                other => return Err(StoreError::Unsupported(format!("aggregate stage {}", other))),
            };
        }

        if let Some(field) = distinct {
            let mut values: Vec<Value> = Vec::new();
            for row in &rows {
                if let Some(value) = row.get(field) {
                    if !values.iter().any(|v| values_equal(v, value)) {
                        values.push(value.clone());
                    }
                }
            }
            return Ok(values);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for name in ["alice", "bob"] {
            let record = json!({ "username": name }).as_object().cloned().unwrap();
            store.create("_User", record).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_create_assigns_metadata() {
        let store = MemoryStore::new();
        let created = store
            .create("GameScore", json!({ "score": 1 }).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(created["objectId"].as_str().unwrap().len(), 10);
        assert!(created.contains_key("createdAt"));
        assert!(created.contains_key("updatedAt"));
    }

    #[tokio::test]
    async fn test_update_without_match_is_object_not_found() {
        let store = seeded().await;
        let result = store
            .update(
                "_User",
                &json!({ "username": "alice", "_failed_login_count": { "$gte": 3 } }),
                &RecordUpdate::new().set("x", json!(1)),
            )
            .await;
        assert!(matches!(result, Err(StoreError::ObjectNotFound)));
    }

    #[tokio::test]
    async fn test_increment_is_applied_atomically_per_call() {
        let store = seeded().await;
        for _ in 0..3 {
            store
                .update("_User", &json!({ "username": "bob" }), &RecordUpdate::new().increment("_failed_login_count", 1))
                .await
                .unwrap();
        }
        let users = store.find("_User", &json!({ "username": "bob" }), &FindOptions::default()).await.unwrap();
        assert_eq!(users[0]["_failed_login_count"], json!(3));
    }

    #[tokio::test]
    async fn test_upsert_creates_from_query() {
        let store = MemoryStore::new();
        store
            .upsert("_GlobalConfig", &json!({ "objectId": "1" }), &RecordUpdate::new().set("params.color", json!("red")))
            .await
            .unwrap();
        let rows = store.find("_GlobalConfig", &json!({ "objectId": "1" }), &FindOptions::limit(1)).await.unwrap();
        assert_eq!(rows[0]["params"], json!({ "color": "red" }));
    }

    #[tokio::test]
    async fn test_destroy_and_purge() {
        let store = seeded().await;
        assert_eq!(store.destroy("_User", &json!({ "username": "alice" })).await.unwrap(), 1);
        store.purge_collection("_User").await.unwrap();
        assert!(store.find("_User", &Value::Null, &FindOptions::default()).await.unwrap().is_empty());
        assert!(matches!(store.purge_collection("Missing").await, Err(StoreError::ObjectNotFound)));
    }

    #[tokio::test]
    async fn test_aggregate_match_count_and_distinct() {
        let store = seeded().await;
        let counted = store
            .aggregate("_User", &Value::Null, &[json!({ "$match": { "username": "bob" } }), json!({ "$count": "total" })], None)
            .await
            .unwrap();
        assert_eq!(counted, vec![json!({ "total": 1 })]);

        let names = store.aggregate("_User", &Value::Null, &[], Some("username")).await.unwrap();
        assert_eq!(names.len(), 2);

        assert!(store.aggregate("_User", &Value::Null, &[json!({ "$group": {} })], None).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_class_name() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.find("bad name", &Value::Null, &FindOptions::default()).await,
            Err(StoreError::InvalidClassName(_))
        ));
    }
}
