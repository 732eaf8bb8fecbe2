//! Request-scoped identity values.
//!
//! Each value has its own type so it can be stored with
//! [`rocket::Request::local_cache`], which keys entries by type. Two guards
//! can never overwrite each other's data through a shared string key.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Admin,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Admin => "admin",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity recognised from a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Principal {
    pub id: Uuid,
    pub kind: PrincipalKind,
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Injected by the user gate once a token carrying a `uid` verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    uid: Uuid,
}

impl UserContext {
    pub fn new(uid: Uuid) -> Self {
        Self { uid }
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn principal(&self) -> Principal {
        Principal {
            id: self.uid,
            kind: PrincipalKind::User,
        }
    }
}

/// Injected by the admin gate after the admin record was found.
///
/// Only the id is carried. Handlers reload the account before evaluating
/// permissions because role and grants may change after the token was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminContext {
    admin_id: Uuid,
    is_admin: bool,
}

impl AdminContext {
    pub fn verified(admin_id: Uuid) -> Self {
        Self {
            admin_id,
            is_admin: true,
        }
    }

    pub fn admin_id(&self) -> Uuid {
        self.admin_id
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn principal(&self) -> Principal {
        Principal {
            id: self.admin_id,
            kind: PrincipalKind::Admin,
        }
    }
}
