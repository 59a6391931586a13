use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::database::{encode_date, Record, Store};
use crate::error::ApiError;
use crate::filter::FindOptions;

pub const PUSH_STATUS_CLASS: &str = "_PushStatus";
pub const INSTALLATION_CLASS: &str = "_Installation";

/// Accepts push requests; delivery itself belongs to a provider adapter
#[async_trait]
pub trait PushController: Send + Sync {
    /// Record the push and return the id of its `_PushStatus` entry
    async fn send_push(&self, body: &Value, where_clause: &Value) -> Result<String, ApiError>;
}

/// Tracks pushes as `_PushStatus` records in the store
pub struct StorePushController {
    store: Arc<dyn Store>,
}

impl StorePushController {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PushController for StorePushController {
    async fn send_push(&self, body: &Value, where_clause: &Value) -> Result<String, ApiError> {
        let targets = self
            .store
            .find(INSTALLATION_CLASS, where_clause, &FindOptions::default())
            .await?
            .len();

        let mut status = Record::new();
        status.insert("pushTime".to_string(), encode_date(Utc::now()));
        status.insert("query".to_string(), json!(where_clause.to_string()));
        status.insert("payload".to_string(), json!(body.get("data").cloned().unwrap_or(Value::Null).to_string()));
        status.insert("source".to_string(), json!("rest"));
        status.insert("status".to_string(), json!("pending"));
        status.insert("numSent".to_string(), json!(0));
        status.insert("numTargeted".to_string(), json!(targets));

        let created = self.store.create(PUSH_STATUS_CLASS, status).await?;
        let id = created
            .get("objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::internal("push status was stored without an objectId"))?
            .to_string();
        info!("_PushStatus {}: queued push for {} installation(s)", id, targets);
        Ok(id)
    }
}
