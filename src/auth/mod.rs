pub mod password;
pub mod session;

pub use password::{hash_password, verify_password};
pub use session::{create_session, destroy_session, lookup_session, user_pointer, SESSION_CLASS, USER_CLASS};

/// Authenticated principal attached to a request
#[derive(Debug, Clone, Default)]
pub struct Auth {
    pub is_master: bool,
    /// Set for the read-only master key; implies `is_master`
    pub is_read_only: bool,
    pub user: Option<SessionUser>,
    pub session_token: Option<String>,
    pub installation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub object_id: String,
    pub username: Option<String>,
}

impl Auth {
    pub fn nobody() -> Self {
        Self::default()
    }

    pub fn master() -> Self {
        Self {
            is_master: true,
            ..Self::default()
        }
    }

    pub fn read_only_master() -> Self {
        Self {
            is_master: true,
            is_read_only: true,
            ..Self::default()
        }
    }

    pub fn for_user(user: SessionUser, session_token: impl Into<String>) -> Self {
        Self {
            user: Some(user),
            session_token: Some(session_token.into()),
            ..Self::default()
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.object_id.as_str())
    }

    pub fn with_installation_id(mut self, installation_id: Option<String>) -> Self {
        self.installation_id = installation_id;
        self
    }
}
