//! Authorization status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthStatus {
    /// The caller is not allowed to run the action.
    Denied,
    /// The backend failed while deciding.
    Error,
    /// The action does not exist or its name is malformed.
    Invalid,
    /// The caller may run the action right now.
    Authorized,
    /// The caller may run the action after authenticating.
    AuthRequired,
    /// The user dismissed the authentication prompt.
    UserCancelled,
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Denied => "denied",
            AuthStatus::Error => "error",
            AuthStatus::Invalid => "invalid",
            AuthStatus::Authorized => "authorized",
            AuthStatus::AuthRequired => "auth_required",
            AuthStatus::UserCancelled => "user_cancelled",
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthStatus::Authorized)
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
