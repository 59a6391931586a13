use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::USER_CLASS;
use crate::context::AppContext;
use crate::database::{Record, RecordUpdate};
use crate::error::{ApiError, ErrorCode};
use crate::filter::FindOptions;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub app_name: String,
    pub to: String,
    pub username: Option<String>,
    pub link: String,
}

/// Outbound email used for password reset and address verification
#[async_trait]
pub trait MailAdapter: Send + Sync {
    async fn send_password_reset_email(&self, message: MailMessage) -> Result<(), MailError>;
    async fn send_verification_email(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Default)]
pub struct LogMailAdapter;

#[async_trait]
impl MailAdapter for LogMailAdapter {
    async fn send_password_reset_email(&self, message: MailMessage) -> Result<(), MailError> {
        info!("[{}] password reset for {}: {}", message.app_name, message.to, message.link);
        Ok(())
    }

    async fn send_verification_email(&self, message: MailMessage) -> Result<(), MailError> {
        info!("[{}] verify email for {}: {}", message.app_name, message.to, message.link);
        Ok(())
    }
}

struct EmailSettings<'a> {
    adapter: &'a Arc<dyn MailAdapter>,
    app_name: &'a str,
    public_server_url: &'a str,
}

fn email_settings(ctx: &AppContext) -> Result<EmailSettings<'_>, ApiError> {
    match (&ctx.mail, ctx.config.server.app_name.as_str(), ctx.config.server.public_server_url.as_deref()) {
        (Some(adapter), app_name, Some(public_server_url)) if !app_name.is_empty() => Ok(EmailSettings {
            adapter,
            app_name,
            public_server_url,
        }),
        _ => Err(ApiError::new(
            ErrorCode::InternalServerError,
            "An appName, publicServerURL, and emailAdapter are required for password reset and email verification functionality.",
        )),
    }
}

/// Fails unless a mail adapter, app name and public URL are all configured
pub fn ensure_email_configured(ctx: &AppContext) -> Result<(), ApiError> {
    email_settings(ctx).map(|_| ())
}

fn build_link(settings: &EmailSettings<'_>, page: &str, token: &str, username: Option<&str>) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("token", token);
    if let Some(username) = username {
        query.append_pair("username", username);
    }
    format!(
        "{}/apps/{}/{}?{}",
        settings.public_server_url.trim_end_matches('/'),
        url::form_urlencoded::byte_serialize(settings.app_name.as_bytes()).collect::<String>(),
        page,
        query.finish()
    )
}

async fn find_user_by_email(ctx: &AppContext, email: &str) -> Result<Option<Record>, ApiError> {
    let users = ctx
        .store
        .find(USER_CLASS, &json!({ "email": email }), &FindOptions::limit(1))
        .await?;
    Ok(users.into_iter().next())
}

/// Store a fresh reset token on the user owning `email` and mail them the reset link
pub async fn send_password_reset_email(ctx: &AppContext, email: &str) -> Result<(), ApiError> {
    let settings = email_settings(ctx)?;
    let user = find_user_by_email(ctx, email)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::EmailNotFound, format!("No user found with email {}.", email)))?;

    let token = Uuid::new_v4().simple().to_string();
    ctx.store
        .update(
            USER_CLASS,
            &json!({ "objectId": user.get("objectId") }),
            &RecordUpdate::new().set("_perishable_token", json!(token)),
        )
        .await?;

    let username = user.get("username").and_then(Value::as_str);
    let message = MailMessage {
        app_name: settings.app_name.to_string(),
        to: email.to_string(),
        username: username.map(str::to_string),
        link: build_link(&settings, "request_password_reset", &token, username),
    };
    settings.adapter.send_password_reset_email(message).await.map_err(|e| {
        error!("Failed to send password reset email: {}", e);
        ApiError::internal(e.to_string())
    })
}

/// Regenerate the verification token for an unverified address and resend the link
pub async fn send_verification_email(ctx: &AppContext, email: &str) -> Result<(), ApiError> {
    let settings = email_settings(ctx)?;
    let user = find_user_by_email(ctx, email)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::EmailNotFound, format!("No user found with email {}", email)))?;

    if user.get("emailVerified").and_then(Value::as_bool).unwrap_or(false) {
        return Err(ApiError::new(ErrorCode::OtherCause, format!("Email {} is already verified.", email)));
    }

    let token = Uuid::new_v4().simple().to_string();
    ctx.store
        .update(
            USER_CLASS,
            &json!({ "objectId": user.get("objectId") }),
            &RecordUpdate::new().set("_email_verify_token", json!(token)),
        )
        .await?;

    let username = user.get("username").and_then(Value::as_str);
    let message = MailMessage {
        app_name: settings.app_name.to_string(),
        to: email.to_string(),
        username: username.map(str::to_string),
        link: build_link(&settings, "verify_email", &token, username),
    };
    settings.adapter.send_verification_email(message).await.map_err(|e| {
        error!("Failed to send verification email: {}", e);
        ApiError::internal(e.to_string())
    })
}
