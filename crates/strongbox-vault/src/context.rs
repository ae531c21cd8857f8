use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};

/// Backend identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is calling. Passed explicitly into every vault operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    Anonymous,
    User(UserId),
}

impl AuthContext {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(UserId::new(id))
    }

    pub fn user_id(&self) -> Result<&UserId> {
        match self {
            Self::User(id) => Ok(id),
            Self::Anonymous => Err(VaultError::NotAuthenticated),
        }
    }
}
