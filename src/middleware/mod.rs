pub mod auth;
pub mod dispatch;
pub mod guards;
pub mod response;

pub use auth::{request_info, resolve_auth};
pub use dispatch::{dispatch, mask_sensitive_url, run_handler};
pub use guards::{enforce_master_key_access, forbid_read_only, master_key_required, require_user};
pub use response::render;
