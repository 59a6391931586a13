use crate::auth::SessionUser;
use crate::error::ApiError;
use crate::router::{guard, RouteRequest, Stage};

/// Reject requests that were not made with the master key (read-only included)
pub fn enforce_master_key_access(req: &RouteRequest) -> Result<(), ApiError> {
    if req.auth.is_master {
        Ok(())
    } else {
        Err(ApiError::unauthorized("unauthorized: master key is required"))
    }
}

/// Reject mutating operations made with the read-only master key
pub fn forbid_read_only(req: &RouteRequest, action: &str) -> Result<(), ApiError> {
    if req.auth.is_read_only {
        Err(ApiError::operation_forbidden(format!("read-only masterKey isn't allowed to {}.", action)))
    } else {
        Ok(())
    }
}

/// The user behind the request's session token
pub fn require_user(req: &RouteRequest) -> Result<&SessionUser, ApiError> {
    req.auth
        .user
        .as_ref()
        .ok_or_else(|| ApiError::invalid_session_token("Invalid session token"))
}

/// Pipeline stage form of [`enforce_master_key_access`]
pub fn master_key_required() -> Stage {
    guard(enforce_master_key_access)
}
