use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::auth::{hash_password, USER_CLASS};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::database::{MemoryStore, Record, Store};
use crate::filter::FindOptions;
use crate::router::RouteRequest;
use crate::services::{MailAdapter, MailError, MailMessage, ManualClock};
use crate::types::HttpMethod;

/// In-memory application context with a controllable clock
pub struct TestContext {
    pub ctx: AppContext,
    pub clock: Arc<ManualClock>,
}

impl TestContext {
    pub const MASTER_KEY: &'static str = "test-master-key";
    pub const READ_ONLY_MASTER_KEY: &'static str = "test-read-only-master-key";

    pub fn new() -> Self {
        Self::with_store_and_config(Arc::new(MemoryStore::new()), |_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        Self::with_store_and_config(Arc::new(MemoryStore::new()), configure)
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self::with_store_and_config(store, |_| {})
    }

    pub fn with_store_and_config(store: Arc<dyn Store>, configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::development();
        config.server.public_server_url = Some("http://localhost:1337/parse".to_string());
        config.security.master_key = Self::MASTER_KEY.to_string();
        config.security.read_only_master_key = Some(Self::READ_ONLY_MASTER_KEY.to_string());
        config.logging.log_requests = false;
        // Cheapest bcrypt work factor keeps login-heavy tests fast
        config.security.password_hash_cost = 4;
        configure(&mut config);

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        let ctx = AppContext::new(config, store).with_clock(clock.clone());
        Self { ctx, clock }
    }

    /// Context with a mail adapter wired in
    pub fn with_mail(mail: Arc<RecordingMailAdapter>) -> Self {
        let mut t = Self::new();
        t.ctx = t.ctx.with_mail(mail);
        t
    }

    pub fn request(&self, method: HttpMethod, path: &str) -> RouteRequest {
        RouteRequest::new(self.ctx.clone(), method, path)
    }

    pub async fn seed_user(&self, username: &str, password: &str) -> Record {
        self.seed_user_with(username, password, json!({})).await
    }

    pub async fn seed_user_with(&self, username: &str, password: &str, extra: Value) -> Record {
        let mut record = Record::new();
        record.insert("username".to_string(), json!(username));
        let hashed = hash_password(password, self.ctx.config.security.password_hash_cost).unwrap();
        record.insert("_hashed_password".to_string(), json!(hashed));
        if let Value::Object(extra) = extra {
            record.extend(extra);
        }
        self.ctx.store.create(USER_CLASS, record).await.unwrap()
    }

    pub async fn find_user(&self, username: &str) -> Option<Record> {
        self.ctx
            .store
            .find(USER_CLASS, &json!({ "username": username }), &FindOptions::limit(1))
            .await
            .unwrap()
            .into_iter()
            .next()
    }
}

/// Mail adapter that keeps every message it was asked to send
#[derive(Debug, Default)]
pub struct RecordingMailAdapter {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailAdapter {
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailAdapter for RecordingMailAdapter {
    async fn send_password_reset_email(&self, message: MailMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn send_verification_email(&self, message: MailMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}
