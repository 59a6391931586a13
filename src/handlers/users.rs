// handlers/users.rs - `_User` routes: sign-up, login/logout, profile, password reset

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{json_from_query, remove_hidden_properties};
use crate::auth::{
    create_session, destroy_session, hash_password, lookup_session, user_pointer, verify_password, SESSION_CLASS,
    USER_CLASS,
};
use crate::context::AppContext;
use crate::database::{decode_date, encode_date, Record, RecordUpdate, StoreError};
use crate::error::{ApiError, ErrorCode};
use crate::filter::FindOptions;
use crate::lockout::AccountLockout;
use crate::middleware::forbid_read_only;
use crate::router::{handler, PromiseRouter, RouteRequest, RouteResponse};
use crate::services::mail;
use crate::types::{is_public_field_name, HttpMethod};

const HASHED_PASSWORD: &str = "_hashed_password";
const PASSWORD_CHANGED_AT: &str = "_password_changed_at";

/// Fields managed by the server that clients may not write
const READ_ONLY_FIELDS: [&str; 4] = ["objectId", "createdAt", "updatedAt", "sessionToken"];

pub fn router() -> PromiseRouter {
    let mut router = PromiseRouter::new();
    router
        .route(HttpMethod::Get, "/users", vec![handler(handle_find)])
        .route(HttpMethod::Post, "/users", vec![handler(handle_create)])
        .route(HttpMethod::Get, "/users/me", vec![handler(handle_me)])
        .route(HttpMethod::Get, "/users/:objectId", vec![handler(handle_get)])
        .route(HttpMethod::Put, "/users/:objectId", vec![handler(handle_update)])
        .route(HttpMethod::Delete, "/users/:objectId", vec![handler(handle_delete)])
        .route(HttpMethod::Get, "/login", vec![handler(handle_log_in)])
        .route(HttpMethod::Post, "/login", vec![handler(handle_log_in)])
        .route(HttpMethod::Post, "/logout", vec![handler(handle_log_out)])
        .route(HttpMethod::Post, "/requestPasswordReset", vec![handler(handle_reset_request)])
        .route(
            HttpMethod::Post,
            "/verificationEmailRequest",
            vec![handler(handle_verification_email_request)],
        )
        .route(HttpMethod::Get, "/verifyPassword", vec![handler(handle_verify_password)]);
    router
}

/// Lookup query and password taken from a login-style request
struct Credentials {
    query: Value,
    username: Option<String>,
    password: String,
}

/// JavaScript-style truthiness for optional body fields
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !matches!(v, Value::Null | Value::Bool(false)) && v.as_str() != Some(""))
}

fn optional_string(value: Option<&Value>) -> Result<Option<String>, ApiError> {
    match value {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ApiError::invalid_credentials()),
    }
}

/// Read credentials from the body, or from the query string when the body lacks them
fn credentials(req: &RouteRequest) -> Result<Credentials, ApiError> {
    let body = req.body.as_object().cloned().unwrap_or_default();
    let missing_in_body = |key: &str| present(body.get(key)).is_none() && req.query.contains_key(key);
    let payload: Map<String, Value> = if missing_in_body("username") || missing_in_body("email") {
        req.query
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect()
    } else {
        body
    };

    let username = present(payload.get("username"));
    let email = present(payload.get("email"));
    if username.is_none() && email.is_none() {
        return Err(ApiError::new(ErrorCode::UsernameMissing, "username/email is required."));
    }
    let password = match present(payload.get("password")) {
        None => return Err(ApiError::new(ErrorCode::PasswordMissing, "password is required.")),
        Some(Value::String(password)) => password.clone(),
        Some(_) => return Err(ApiError::invalid_credentials()),
    };
    let username = optional_string(username)?;
    let email = optional_string(email)?;

    let query = match (&username, &email) {
        (Some(username), Some(email)) => json!({ "email": email, "username": username }),
        (None, Some(email)) => json!({ "email": email }),
        (Some(username), None) => json!({ "$or": [{ "username": username }, { "email": username }] }),
        (None, None) => return Err(ApiError::new(ErrorCode::UsernameMissing, "username/email is required.")),
    };

    Ok(Credentials { query, username, password })
}

/// Verify a username/email + password pair, scoring the attempt against the lockout policy
async fn authenticate_user(req: &RouteRequest) -> Result<Record, ApiError> {
    let ctx = &req.ctx;
    let credentials = credentials(req)?;

    let mut results = ctx.store.find(USER_CLASS, &credentials.query, &FindOptions::default()).await?;
    let user = if results.len() > 1 {
        // one user's email equals another user's username
        warn!("There is a user whose email is the same as another user's username, logging in based on username");
        results
            .into_iter()
            .find(|user| user.get("username").and_then(Value::as_str) == credentials.username.as_deref())
    } else {
        results.pop()
    };
    let mut user = user.ok_or_else(ApiError::invalid_credentials)?;

    let is_valid_password = user
        .get(HASHED_PASSWORD)
        .and_then(Value::as_str)
        .is_some_and(|hash| verify_password(&credentials.password, hash));

    let username = user.get("username").and_then(Value::as_str).unwrap_or_default();
    AccountLockout::new(username, ctx)
        .handle_login_attempt(is_valid_password)
        .await?;

    if !is_valid_password {
        return Err(ApiError::invalid_credentials());
    }

    // An empty ACL restricts the account to master key access
    if !req.auth.is_master && user.get("ACL").and_then(Value::as_object).is_some_and(Map::is_empty) {
        return Err(ApiError::invalid_credentials());
    }

    let email = &ctx.config.email;
    let email_verified = user.get("emailVerified").and_then(Value::as_bool).unwrap_or(false);
    if email.verify_user_emails && email.prevent_login_with_unverified_email && !email_verified {
        return Err(ApiError::new(ErrorCode::EmailNotFound, "User email is not verified."));
    }

    let drop_auth_data = match user.get_mut("authData") {
        Some(Value::Object(auth_data)) => {
            auth_data.retain(|_, provider| !provider.is_null());
            auth_data.is_empty()
        }
        _ => false,
    };
    if drop_auth_data {
        user.remove("authData");
    }

    Ok(user)
}

fn object_id_of(record: &Record) -> Result<String, ApiError> {
    record
        .get("objectId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::internal("user record without objectId"))
}

async fn find_user_by_id(ctx: &AppContext, object_id: &str) -> Result<Option<Record>, ApiError> {
    let users = ctx
        .store
        .find(USER_CLASS, &json!({ "objectId": object_id }), &FindOptions::limit(1))
        .await?;
    Ok(users.into_iter().next())
}

fn max_password_age(ctx: &AppContext) -> Option<i64> {
    ctx.config
        .password_policy
        .as_ref()
        .and_then(|policy| policy.max_password_age)
        .filter(|days| *days > 0)
}

fn is_valid_email(email: &str) -> bool {
    email.split_once('@').is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
}

async fn handle_log_in(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let ctx = &req.ctx;
    let mut user = authenticate_user(&req).await?;

    if let Some(max_age_days) = max_password_age(ctx) {
        match user.get(PASSWORD_CHANGED_AT).and_then(decode_date) {
            Some(changed_at) => {
                if changed_at + Duration::days(max_age_days) < ctx.now() {
                    return Err(ApiError::object_not_found(
                        "Your password has expired. Please reset your password.",
                    ));
                }
            }
            None => {
                // Password predates the policy: start the clock now
                let query = json!({ "username": user.get("username") });
                let update = RecordUpdate::new().set(PASSWORD_CHANGED_AT, encode_date(ctx.now()));
                if let Err(err) = ctx.store.update(USER_CLASS, &query, &update).await {
                    warn!("Failed to initialise password change date: {}", err);
                }
            }
        }
    }

    let object_id = object_id_of(&user)?;
    remove_hidden_properties(&mut user);
    let session = create_session(ctx, &object_id, "login", req.info.installation_id.as_deref()).await?;
    user.insert(
        "sessionToken".to_string(),
        session.get("sessionToken").cloned().unwrap_or(Value::Null),
    );
    debug!("User {} logged in", object_id);

    Ok(RouteResponse::json(Value::Object(user)))
}

async fn handle_verify_password(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let mut user = authenticate_user(&req).await?;
    remove_hidden_properties(&mut user);
    Ok(RouteResponse::json(Value::Object(user)))
}

async fn handle_log_out(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    if let Some(token) = req.info.session_token.as_deref() {
        let removed = destroy_session(&req.ctx, token).await?;
        debug!("Logout removed {} session(s)", removed);
    }
    Ok(RouteResponse::json(json!({})))
}

async fn handle_me(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let invalid = || ApiError::invalid_session_token("Invalid session token");
    let token = req.info.session_token.as_deref().ok_or_else(invalid)?;
    let auth = lookup_session(&req.ctx, token).await?.ok_or_else(invalid)?;
    let user_id = auth.user_id().ok_or_else(invalid)?;
    let mut user = find_user_by_id(&req.ctx, user_id).await?.ok_or_else(invalid)?;

    remove_hidden_properties(&mut user);
    user.insert("sessionToken".to_string(), json!(token));
    Ok(RouteResponse::json(Value::Object(user)))
}

async fn handle_find(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let params = json_from_query(&req.query);
    let where_clause = params.get("where").cloned().unwrap_or_else(|| json!({}));

    if !req.auth.is_master {
        if let Some(hidden) = where_clause
            .as_object()
            .and_then(|clause| clause.keys().find(|key| !key.starts_with('$') && !is_public_field_name(key)))
        {
            return Err(ApiError::new(ErrorCode::InvalidQuery, format!("Invalid key name: {}", hidden)));
        }
    }

    let options = FindOptions {
        order: params.get("order").and_then(Value::as_str).map(str::to_string),
        limit: params.get("limit").and_then(Value::as_u64).map(|n| n as usize),
        skip: params.get("skip").and_then(Value::as_u64).map(|n| n as usize),
    };

    let results: Vec<Value> = req
        .ctx
        .store
        .find(USER_CLASS, &where_clause, &options)
        .await?
        .into_iter()
        .map(|mut user| {
            remove_hidden_properties(&mut user);
            Value::Object(user)
        })
        .collect();
    Ok(RouteResponse::json(json!({ "results": results })))
}

async fn handle_get(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let object_id = req
        .param("objectId")
        .ok_or_else(|| ApiError::object_not_found("Object not found."))?;
    let mut user = find_user_by_id(&req.ctx, object_id)
        .await?
        .ok_or_else(|| ApiError::object_not_found("Object not found."))?;
    remove_hidden_properties(&mut user);
    Ok(RouteResponse::json(Value::Object(user)))
}

/// Client-writable fields of a create/update body, with `password` split out
fn writable_fields(body: &Value) -> Result<(Map<String, Value>, Option<String>), ApiError> {
    let body = body
        .as_object()
        .ok_or_else(|| ApiError::invalid_json("request body must be a JSON object"))?;

    let mut fields = Map::new();
    let mut password = None;
    for (key, value) in body {
        if key == "password" {
            match value {
                Value::String(p) if !p.is_empty() => password = Some(p.clone()),
                _ => return Err(ApiError::new(ErrorCode::PasswordMissing, "password is required")),
            }
        } else if READ_ONLY_FIELDS.contains(&key.as_str()) || !is_public_field_name(key) {
            return Err(ApiError::invalid_json(format!("Invalid field name: {}.", key)));
        } else {
            fields.insert(key.clone(), value.clone());
        }
    }
    Ok((fields, password))
}

/// Reject usernames and emails already held by another user
async fn ensure_unique(ctx: &AppContext, fields: &Map<String, Value>, exclude: Option<&str>) -> Result<(), ApiError> {
    let checks = [
        ("username", ErrorCode::UsernameTaken, "Account already exists for this username."),
        ("email", ErrorCode::EmailTaken, "Account already exists for this email address."),
    ];
    for (field, code, message) in checks {
        let Some(value) = fields.get(field).filter(|v| !v.is_null()) else { continue };
        let mut query = json!({ field: value });
        if let Some(object_id) = exclude {
            query["objectId"] = json!({ "$ne": object_id });
        }
        if !ctx.store.find(USER_CLASS, &query, &FindOptions::limit(1)).await?.is_empty() {
            return Err(ApiError::new(code, message));
        }
    }
    Ok(())
}

fn validate_email_field(fields: &Map<String, Value>) -> Result<Option<String>, ApiError> {
    match fields.get("email") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(email)) if is_valid_email(email) => Ok(Some(email.clone())),
        Some(_) => Err(ApiError::new(ErrorCode::InvalidEmailAddress, "Email address format is invalid.")),
    }
}

async fn handle_create(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let ctx = &req.ctx;
    let (mut fields, password) = writable_fields(&req.body)?;

    match fields.get("username") {
        Some(Value::String(username)) if !username.is_empty() => {}
        _ => return Err(ApiError::new(ErrorCode::UsernameMissing, "bad or missing username")),
    }
    let password = password.ok_or_else(|| ApiError::new(ErrorCode::PasswordMissing, "password is required"))?;
    let email = validate_email_field(&fields)?;
    ensure_unique(ctx, &fields, None).await?;

    let verify_email = ctx.config.email.verify_user_emails && email.is_some();
    if fields.contains_key("emailVerified") && !req.auth.is_master {
        return Err(ApiError::operation_forbidden("Clients aren't allowed to manually update email verification."));
    }
    if verify_email && !fields.contains_key("emailVerified") {
        fields.insert("emailVerified".to_string(), json!(false));
    }
    let hashed = hash_password(&password, ctx.config.security.password_hash_cost)?;
    fields.insert(HASHED_PASSWORD.to_string(), json!(hashed));
    if max_password_age(ctx).is_some() {
        fields.insert(PASSWORD_CHANGED_AT.to_string(), encode_date(ctx.now()));
    }

    let created = ctx.store.create(USER_CLASS, fields).await?;
    let object_id = object_id_of(&created)?;

    if let (true, Some(email)) = (verify_email, email.as_deref()) {
        if mail::ensure_email_configured(ctx).is_ok() {
            if let Err(err) = mail::send_verification_email(ctx, email).await {
                warn!("Failed to send verification email to {}: {}", email, err);
            }
        }
    }

    let session = create_session(ctx, &object_id, "signup", req.info.installation_id.as_deref()).await?;
    let base = ctx
        .config
        .server
        .public_server_url
        .as_deref()
        .unwrap_or(&ctx.config.server.mount_path)
        .trim_end_matches('/');

    Ok(RouteResponse::json(json!({
        "objectId": object_id,
        "createdAt": created.get("createdAt"),
        "sessionToken": session.get("sessionToken"),
    }))
    .with_status(StatusCode::CREATED)
    .with_location(format!("{}/users/{}", base, object_id)))
}

/// The target user id, once the caller is allowed to modify it
fn authorize_write<'a>(req: &'a RouteRequest, action: &str) -> Result<&'a str, ApiError> {
    forbid_read_only(req, action)?;
    let object_id = req
        .param("objectId")
        .ok_or_else(|| ApiError::object_not_found("Object not found."))?;
    if req.auth.is_master || req.auth.user_id() == Some(object_id) {
        Ok(object_id)
    } else {
        Err(ApiError::new(ErrorCode::SessionMissing, format!("Cannot modify user {}.", object_id)))
    }
}

async fn handle_update(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let ctx = &req.ctx;
    let object_id = authorize_write(&req, "perform the update operation")?;
    let (fields, password) = writable_fields(&req.body)?;

    if let Some(username) = fields.get("username") {
        if !matches!(username, Value::String(u) if !u.is_empty()) {
            return Err(ApiError::new(ErrorCode::UsernameMissing, "bad or missing username"));
        }
    }
    validate_email_field(&fields)?;
    if fields.contains_key("emailVerified") && !req.auth.is_master {
        return Err(ApiError::operation_forbidden("Clients aren't allowed to manually update email verification."));
    }
    ensure_unique(ctx, &fields, Some(object_id)).await?;

    let mut update = RecordUpdate::from_json(&fields)?;
    if let Some(password) = &password {
        let hashed = hash_password(password, ctx.config.security.password_hash_cost)?;
        update = update.set(HASHED_PASSWORD, json!(hashed));
        if max_password_age(ctx).is_some() {
            update = update.set(PASSWORD_CHANGED_AT, encode_date(ctx.now()));
        }
    }
    if update.is_empty() {
        return Err(ApiError::invalid_json("nothing to update"));
    }

    ctx.store
        .update(USER_CLASS, &json!({ "objectId": object_id }), &update)
        .await?;

    if password.is_some() {
        // Changing the password signs the user out everywhere else
        let mut others = json!({ "user": user_pointer(object_id) });
        if let Some(token) = &req.auth.session_token {
            others["sessionToken"] = json!({ "$ne": token });
        }
        let revoked = ctx.store.destroy(SESSION_CLASS, &others).await?;
        debug!("Password change for {} revoked {} session(s)", object_id, revoked);
    }

    let updated = find_user_by_id(ctx, object_id)
        .await?
        .ok_or_else(|| ApiError::object_not_found("Object not found."))?;
    Ok(RouteResponse::json(json!({ "updatedAt": updated.get("updatedAt") })))
}

async fn handle_delete(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let ctx = &req.ctx;
    let object_id = authorize_write(&req, "perform the delete operation")?;

    let removed = match ctx.store.destroy(USER_CLASS, &json!({ "objectId": object_id })).await {
        Ok(removed) => removed,
        Err(StoreError::ObjectNotFound) => 0,
        Err(err) => return Err(err.into()),
    };
    if removed == 0 {
        return Err(ApiError::object_not_found("Object not found."));
    }
    ctx.store
        .destroy(SESSION_CLASS, &json!({ "user": user_pointer(object_id) }))
        .await?;

    Ok(RouteResponse::json(json!({})))
}

/// The `email` body field, required and a string
fn email_from_body(req: &RouteRequest) -> Result<&str, ApiError> {
    match present(req.body.get("email")) {
        None => Err(ApiError::new(ErrorCode::EmailMissing, "you must provide an email")),
        Some(Value::String(email)) => Ok(email),
        Some(_) => Err(ApiError::new(ErrorCode::InvalidEmailAddress, "you must provide a valid email string")),
    }
}

async fn handle_reset_request(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    mail::ensure_email_configured(&req.ctx)?;
    let email = email_from_body(&req)?;
    mail::send_password_reset_email(&req.ctx, email).await?;
    Ok(RouteResponse::json(json!({})))
}

async fn handle_verification_email_request(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    mail::ensure_email_configured(&req.ctx)?;
    let email = email_from_body(&req)?;
    mail::send_verification_email(&req.ctx, email).await?;
    Ok(RouteResponse::json(json!({})))
}
