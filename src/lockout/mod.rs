//! Failed-login lockout policy.
//!
//! State lives on the `_User` record: `_failed_login_count` and
//! `_account_lockout_expires_at`. A principal is locked while the count is at
//! or above the threshold and the expiry is still in the future. Every write
//! goes through the store's own update primitives; nothing here holds a lock.

use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::USER_CLASS;
use crate::config::AccountLockoutConfig;
use crate::context::AppContext;
use crate::database::{encode_date, RecordUpdate, Store, StoreError};
use crate::error::ApiError;
use crate::filter::FindOptions;
use crate::services::Clock;

const FAILED_LOGIN_COUNT: &str = "_failed_login_count";
const LOCKOUT_EXPIRES_AT: &str = "_account_lockout_expires_at";

pub struct AccountLockout {
    username: String,
    policy: Option<AccountLockoutConfig>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AccountLockout {
    pub fn new(username: impl Into<String>, ctx: &AppContext) -> Self {
        Self {
            username: username.into(),
            policy: ctx.config.account_lockout,
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
        }
    }

    /// Score a login attempt. A no-op when no policy is configured; otherwise a
    /// locked account is rejected before the attempt is counted.
    pub async fn handle_login_attempt(&self, login_successful: bool) -> Result<(), ApiError> {
        let Some(policy) = self.policy else {
            return Ok(());
        };

        self.ensure_not_locked(&policy).await?;
        if login_successful {
            self.set_failed_login_count(0).await
        } else {
            self.handle_failed_login_attempt(&policy).await
        }
    }

    /// Fails with `AccountLocked` while the lockout is in force
    pub async fn not_locked(&self) -> Result<(), ApiError> {
        match self.policy {
            Some(policy) => self.ensure_not_locked(&policy).await,
            None => Ok(()),
        }
    }

    async fn ensure_not_locked(&self, policy: &AccountLockoutConfig) -> Result<(), ApiError> {
        let query = json!({
            "username": self.username,
            LOCKOUT_EXPIRES_AT: { "$gt": encode_date(self.clock.now()) },
            FAILED_LOGIN_COUNT: { "$gte": policy.threshold },
        });
        let locked = self.store.find(USER_CLASS, &query, &FindOptions::limit(1)).await?;
        if locked.is_empty() {
            Ok(())
        } else {
            debug!("Login rejected for locked account {}", self.username);
            Err(ApiError::AccountLocked {
                duration_minutes: policy.duration,
            })
        }
    }

    async fn handle_failed_login_attempt(&self, policy: &AccountLockoutConfig) -> Result<(), ApiError> {
        self.init_failed_login_count().await?;
        self.increment_failed_login_count().await?;
        self.set_lockout_expiration(policy).await
    }

    async fn set_failed_login_count(&self, value: i64) -> Result<(), ApiError> {
        self.store
            .update(
                USER_CLASS,
                &self.user_query(),
                &RecordUpdate::new().set(FAILED_LOGIN_COUNT, json!(value)),
            )
            .await?;
        Ok(())
    }

    /// The increment is a pure delta, so the counter has to exist first
    async fn init_failed_login_count(&self) -> Result<(), ApiError> {
        let query = json!({
            "username": self.username,
            FAILED_LOGIN_COUNT: { "$exists": true },
        });
        let existing = self.store.find(USER_CLASS, &query, &FindOptions::limit(1)).await?;
        if existing.is_empty() {
            self.set_failed_login_count(0).await?;
        }
        Ok(())
    }

    async fn increment_failed_login_count(&self) -> Result<(), ApiError> {
        self.store
            .update(
                USER_CLASS,
                &self.user_query(),
                &RecordUpdate::new().increment(FAILED_LOGIN_COUNT, 1),
            )
            .await?;
        debug!("Recorded failed login for {}", self.username);
        Ok(())
    }

    /// Only matches once the counter reached the threshold; no match is not an error
    async fn set_lockout_expiration(&self, policy: &AccountLockoutConfig) -> Result<(), ApiError> {
        let query = json!({
            "username": self.username,
            FAILED_LOGIN_COUNT: { "$gte": policy.threshold },
        });
        let expires_at = self.clock.now() + Duration::minutes(i64::from(policy.duration));
        let update = RecordUpdate::new().set(LOCKOUT_EXPIRES_AT, encode_date(expires_at));

        match self.store.update(USER_CLASS, &query, &update).await {
            Ok(()) => {
                warn!("Account {} locked for {} minute(s)", self.username, policy.duration);
                Ok(())
            }
            Err(StoreError::ObjectNotFound) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn user_query(&self) -> Value {
        json!({ "username": self.username })
    }
}
