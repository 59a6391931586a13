use chrono::Duration;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::{Auth, SessionUser};
use crate::context::AppContext;
use crate::database::{decode_date, encode_date, Record};
use crate::error::ApiError;
use crate::filter::FindOptions;

pub const USER_CLASS: &str = "_User";
pub const SESSION_CLASS: &str = "_Session";

pub fn user_pointer(object_id: &str) -> Value {
    json!({ "__type": "Pointer", "className": USER_CLASS, "objectId": object_id })
}

/// Persist a new `_Session` for a user and return the stored record
pub async fn create_session(
    ctx: &AppContext,
    user_id: &str,
    action: &str,
    installation_id: Option<&str>,
) -> Result<Record, ApiError> {
    let expires_at = ctx.now() + Duration::seconds(ctx.config.security.session_length);
    let mut record = Record::new();
    record.insert("sessionToken".to_string(), json!(format!("r:{}", Uuid::new_v4().simple())));
    record.insert("user".to_string(), user_pointer(user_id));
    record.insert("createdWith".to_string(), json!({ "action": action, "authProvider": "password" }));
    record.insert("restricted".to_string(), json!(false));
    record.insert("expiresAt".to_string(), encode_date(expires_at));
    if let Some(installation_id) = installation_id {
        record.insert("installationId".to_string(), json!(installation_id));
    }

    let session = ctx.store.create(SESSION_CLASS, record).await?;
    debug!("Created session for user {} ({})", user_id, action);
    Ok(session)
}

/// Resolve a session token to an authenticated user; unknown or expired tokens yield `None`
pub async fn lookup_session(ctx: &AppContext, token: &str) -> Result<Option<Auth>, ApiError> {
    let sessions = ctx
        .store
        .find(SESSION_CLASS, &json!({ "sessionToken": token }), &FindOptions::limit(1))
        .await?;
    let Some(session) = sessions.into_iter().next() else {
        return Ok(None);
    };

    let expired = session
        .get("expiresAt")
        .and_then(decode_date)
        .is_some_and(|expires_at| expires_at <= ctx.now());
    if expired {
        debug!("Session token has expired");
        return Ok(None);
    }

    let Some(user_id) = session.get("user").and_then(|u| u.get("objectId")).and_then(Value::as_str) else {
        return Ok(None);
    };
    let users = ctx
        .store
        .find(USER_CLASS, &json!({ "objectId": user_id }), &FindOptions::limit(1))
        .await?;
    let Some(user) = users.into_iter().next() else {
        return Ok(None);
    };

    let session_user = SessionUser {
        object_id: user_id.to_string(),
        username: user.get("username").and_then(Value::as_str).map(str::to_string),
    };
    Ok(Some(Auth::for_user(session_user, token)))
}

pub async fn destroy_session(ctx: &AppContext, token: &str) -> Result<u64, ApiError> {
    Ok(ctx.store.destroy(SESSION_CLASS, &json!({ "sessionToken": token })).await?)
}
