use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Row};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use super::{equality_fields, iso_string, new_object_id, FieldUpdate, Record, RecordUpdate, Store, StoreError};
use crate::filter::{Filter, FindOptions};

/// PostgreSQL backed store: one table per class holding `(object_id TEXT, data JSONB)`
pub struct PgStore {
    pool: PgPool,
    known_tables: RwLock<HashSet<String>>,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32, connect_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
        info!("Connected to PostgreSQL store (max_connections={})", max_connections);
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            known_tables: RwLock::new(HashSet::new()),
        }
    }

    /// Create the class table on first use
    async fn ensure_table(&self, filter: &Filter) -> Result<(), StoreError> {
        let table = filter.table_name();
        {
            let known = self.known_tables.read().await;
            if known.contains(table) {
                return Ok(());
            }
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (object_id TEXT PRIMARY KEY, data JSONB NOT NULL)",
            table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        self.known_tables.write().await.insert(table.to_string());
        Ok(())
    }

    async fn filter_for(&self, class_name: &str) -> Result<Filter, StoreError> {
        let filter = Filter::new(class_name).map_err(|_| StoreError::InvalidClassName(class_name.to_string()))?;
        self.ensure_table(&filter).await?;
        Ok(filter)
    }

    async fn insert(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        let object_id = record.get("objectId").and_then(Value::as_str).unwrap_or_default().to_string();
        let sql = format!("INSERT INTO \"{}\" (object_id, data) VALUES ($1, $2)", table);
        sqlx::query(&sql)
            .bind(&object_id)
            .bind(Json(Value::Object(record.clone())))
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                    StoreError::Duplicate(format!("objectId {} already exists in {}", object_id, table))
                }
                _ => StoreError::Sqlx(e),
            })?;
        Ok(())
    }
}

/// Builds the `SET data = ...` expression for an update, numbering parameters
/// after the ones already used by the WHERE clause
struct UpdateSql {
    params: Vec<Value>,
    param_index: usize,
}

impl UpdateSql {
    fn new(starting_param_index: usize) -> Self {
        Self { params: vec![], param_index: starting_param_index }
    }

    fn param(&mut self, value: Value) -> String {
        self.params.push(value);
        self.param_index += 1;
        format!("${}::jsonb", self.param_index)
    }

    /// Field paths are bound like values and unpacked to `text[]` server side
    fn path_param(&mut self, path: &[String]) -> String {
        let p = self.param(json!(path));
        format!("ARRAY(SELECT jsonb_array_elements_text({p}))")
    }

    fn build(&mut self, update: &RecordUpdate) -> String {
        let mut expr = "data".to_string();
        for (path, field_update) in update.iter() {
            expr = match field_update {
                FieldUpdate::Set(value) => {
                    let parents = self.ensure_parents(expr, path);
                    let path = self.path_param(path);
                    let p = self.param(value.clone());
                    format!("jsonb_set({parents}, {path}, {p}, true)")
                }
                FieldUpdate::Delete => {
                    let path = self.path_param(path);
                    format!("({expr} #- {path})")
                }
                FieldUpdate::Increment(amount) => {
                    let path = self.path_param(path);
                    let p = self.param(json!(amount));
                    format!(
                        "jsonb_set({expr}, {path}, to_jsonb(COALESCE(({expr} #>> {path})::bigint, 0) + ({p} #>> '{{}}')::bigint), true)"
                    )
                }
            };
        }
        let p = self.param(json!(iso_string(Utc::now())));
        format!("jsonb_set({expr}, '{{updatedAt}}', {p}, true)")
    }

    /// jsonb_set only creates the last path element, so intermediate objects are created first
    fn ensure_parents(&mut self, mut expr: String, path: &[String]) -> String {
        for depth in 1..path.len() {
            let parent = self.path_param(&path[..depth]);
            expr = format!("jsonb_set({expr}, {parent}, COALESCE({expr} #> {parent}, '{{}}'::jsonb), true)");
        }
        expr
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: Vec<Value>,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        query = query.bind(Json(param));
    }
    query
}

#[async_trait]
impl Store for PgStore {
    async fn find(&self, class_name: &str, query: &Value, options: &FindOptions) -> Result<Vec<Record>, StoreError> {
        let mut filter = self.filter_for(class_name).await?;
        filter.assign(query, options)?;
        let sql = filter.to_sql();

        let rows = bind_all(sqlx::query(&sql.query), sql.params)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let Json(data): Json<Value> = row.try_get("data")?;
            if let Value::Object(record) = data {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn create(&self, class_name: &str, mut record: Record) -> Result<Record, StoreError> {
        let filter = self.filter_for(class_name).await?;
        let now = json!(iso_string(Utc::now()));
        record.entry("objectId".to_string()).or_insert_with(|| json!(new_object_id()));
        record.entry("createdAt".to_string()).or_insert_with(|| now.clone());
        record.entry("updatedAt".to_string()).or_insert(now);
        self.insert(filter.table_name(), &record).await?;
        Ok(record)
    }

    async fn update(&self, class_name: &str, query: &Value, update: &RecordUpdate) -> Result<(), StoreError> {
        let mut filter = self.filter_for(class_name).await?;
        filter.where_clause(query)?;
        let where_sql = filter.to_where_sql(0);

        let mut update_sql = UpdateSql::new(where_sql.params.len());
        let set_expr = update_sql.build(update);

        let table = filter.table_name();
        let sql = format!(
            "UPDATE \"{table}\" SET data = {set_expr} WHERE object_id = (SELECT object_id FROM \"{table}\" WHERE {} LIMIT 1 FOR UPDATE)",
            where_sql.query
        );

        let mut params = where_sql.params;
        params.extend(update_sql.params);
        let result = bind_all(sqlx::query(&sql), params).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectNotFound);
        }
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
        let mut filter = self.filter_for(class_name).await?;
        filter.where_clause(query)?;
        let where_sql = filter.to_where_sql(0);
        let sql = format!("DELETE FROM \"{}\" WHERE {}", filter.table_name(), where_sql.query);
        let result = bind_all(sqlx::query(&sql), where_sql.params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn purge_collection(&self, class_name: &str) -> Result<(), StoreError> {
        let filter = self.filter_for(class_name).await?;
        let sql = format!("DELETE FROM \"{}\"", filter.table_name());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_sql_increment_and_nested_set() {
        let mut update_sql = UpdateSql::new(1);
        let expr = update_sql.build(
            &RecordUpdate::new()
                .increment("_failed_login_count", 1)
                .set("params.color", json!("red")),
        );
        assert!(expr.contains(
            "COALESCE((data #>> ARRAY(SELECT jsonb_array_elements_text($2::jsonb)))::bigint, 0) + ($3::jsonb #>> '{}')::bigint"
        ));
        assert!(expr.contains("ARRAY(SELECT jsonb_array_elements_text($5::jsonb)), $6::jsonb, true)"));
        assert!(expr.ends_with("'{updatedAt}', $7::jsonb, true)"));
        assert_eq!(
            update_sql.params,
            vec![
                json!(["_failed_login_count"]),
                json!(1),
                json!(["params"]),
                json!(["params", "color"]),
                json!("red"),
                update_sql.params[5].clone(),
            ]
        );
    }

    #[test]
    fn test_update_sql_delete() {
        let mut update_sql = UpdateSql::new(0);
        let expr = update_sql.build(&RecordUpdate::new().unset("sessionToken"));
        assert!(expr.starts_with("jsonb_set((data #- ARRAY(SELECT jsonb_array_elements_text($1::jsonb)))"));
        assert_eq!(update_sql.params[0], json!(["sessionToken"]));
    }

    #[test]
    fn test_update_sql_never_inlines_field_names() {
        let key = "x}', '\"pwned\"'::jsonb, true) || (SELECT '{}'::jsonb FROM pg_sleep(5)) || jsonb_set(data, '{y";
        let mut update_sql = UpdateSql::new(0);
        let expr = update_sql.build(&RecordUpdate::new().set(&format!("params.{}", key), json!(1)));
        assert!(!expr.contains("pg_sleep"));
        assert!(!expr.contains("pwned"));
        assert!(update_sql.params.contains(&json!(["params", key])));
    }
}
