//! The identity boundary (§6): the core trusts the subject's user id but
//! performs its own authorization on every write.

use serde::{Deserialize, Serialize};

use super::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "user" => Role::User,
            "admin" => Role::Admin,
            _ => return None,
        })
    }
}

/// The authenticated caller, as extracted by `auth::middleware` from a
/// bearer token issued by the identity provider stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub user_id: UserId,
    pub role: Role,
}

impl Subject {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
