use tracing::error;

use crate::error::ApiError;

/// bcrypt digest of `password` at the given work factor
pub fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    bcrypt::hash(password, cost).map_err(|e| {
        error!("Password hashing failed: {}", e);
        ApiError::internal(format!("password hashing failed: {}", e))
    })
}

/// Compare a candidate password against a stored bcrypt digest; malformed digests never match
pub fn verify_password(password: &str, stored: &str) -> bool {
    bcrypt::verify(password, stored).unwrap_or(false)
}
