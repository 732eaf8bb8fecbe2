//! Role and permission model plus the pure evaluator used by admin handlers.
//!
//! Nothing here touches the store. Callers load the acting admin and the
//! target immediately before asking, so a role change takes effect on the
//! next request.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    Admin,
    Editor,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::SuperAdmin, Role::Admin, Role::Editor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Admin => "ADMIN",
            Role::Editor => "EDITOR",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "Full system access with all permissions",
            Role::Admin => "Administrative access to manage events and users",
            Role::Editor => "Limited access to edit content only",
        }
    }

    pub fn is_super_admin(&self) -> bool {
        matches!(self, Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| UnknownVariant {
                kind: "role",
                value: value.to_string(),
            })
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ManageEvents,
    CreateEvent,
    EditEvent,
    DeleteEvent,
    ViewEvent,
    ManageBookings,
    CreateBooking,
    EditBooking,
    DeleteBooking,
    ViewBooking,
    ManageUsers,
    ViewReports,
}

impl Permission {
    pub const ALL: [Permission; 12] = [
        Permission::ManageEvents,
        Permission::CreateEvent,
        Permission::EditEvent,
        Permission::DeleteEvent,
        Permission::ViewEvent,
        Permission::ManageBookings,
        Permission::CreateBooking,
        Permission::EditBooking,
        Permission::DeleteBooking,
        Permission::ViewBooking,
        Permission::ManageUsers,
        Permission::ViewReports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageEvents => "MANAGE_EVENTS",
            Permission::CreateEvent => "CREATE_EVENT",
            Permission::EditEvent => "EDIT_EVENT",
            Permission::DeleteEvent => "DELETE_EVENT",
            Permission::ViewEvent => "VIEW_EVENT",
            Permission::ManageBookings => "MANAGE_BOOKINGS",
            Permission::CreateBooking => "CREATE_BOOKING",
            Permission::EditBooking => "EDIT_BOOKING",
            Permission::DeleteBooking => "DELETE_BOOKING",
            Permission::ViewBooking => "VIEW_BOOKING",
            Permission::ManageUsers => "MANAGE_USERS",
            Permission::ViewReports => "VIEW_REPORTS",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Permission::ManageEvents => "Full control over all events",
            Permission::CreateEvent => "Ability to create new events",
            Permission::EditEvent => "Ability to modify existing events",
            Permission::DeleteEvent => "Ability to remove events from the system",
            Permission::ViewEvent => "Ability to view event details",
            Permission::ManageBookings => "Full control over all bookings",
            Permission::CreateBooking => "Ability to create new bookings",
            Permission::EditBooking => "Ability to modify existing bookings",
            Permission::DeleteBooking => "Ability to cancel bookings",
            Permission::ViewBooking => "Ability to view booking details",
            Permission::ManageUsers => "Ability to manage user accounts and permissions",
            Permission::ViewReports => "Ability to view system reports and analytics",
        }
    }

    /// Whether holding `self` also grants `other`.
    ///
    /// The two `MANAGE_*` permissions cover their whole family; everything
    /// else only covers itself.
    pub fn implies(&self, other: Permission) -> bool {
        if *self == other {
            return true;
        }
        match self {
            Permission::ManageEvents => matches!(
                other,
                Permission::CreateEvent
                    | Permission::EditEvent
                    | Permission::DeleteEvent
                    | Permission::ViewEvent
            ),
            Permission::ManageBookings => matches!(
                other,
                Permission::CreateBooking
                    | Permission::EditBooking
                    | Permission::DeleteBooking
                    | Permission::ViewBooking
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| UnknownVariant {
                kind: "permission",
                value: value.to_string(),
            })
    }
}

/// Explicit grants held by an account. Ordered and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Hierarchical check: true when any held permission implies `required`.
    pub fn grants(&self, required: Permission) -> bool {
        self.0.iter().any(|held| held.implies(required))
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_strings(&self) -> Vec<String> {
        self.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The party asking to perform an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
    pub permissions: PermissionSet,
}

impl Actor {
    /// Effective authorization: the role override plus explicit grants.
    pub fn holds(&self, permission: Permission) -> bool {
        self.role.is_super_admin() || self.permissions.grants(permission)
    }
}

/// The account an operation is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Update,
    /// Changing an account's role or explicit permissions. `role` is the
    /// role the target ends up with.
    Grant { role: Role },
    Delete,
    SendVerification,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Denial {
    #[error("a super admin cannot delete their own account")]
    SuperAdminSelfDelete,
    #[error("only a super admin can grant the SUPER_ADMIN role")]
    SuperAdminGrantRestricted,
    #[error("only a super admin can create SUPER_ADMIN accounts")]
    SuperAdminCreationRestricted,
    #[error("super admin accounts can only be modified by a super admin")]
    ProtectedTarget,
    #[error("missing permission {0}")]
    MissingPermission(Permission),
}

/// Decide whether `actor` may perform `operation` on `target`.
pub fn authorize(actor: &Actor, target: &Target, operation: Operation) -> Result<(), Denial> {
    let is_self = actor.id == target.id;
    let actor_is_super = actor.role.is_super_admin();

    if operation == Operation::Delete && is_self && actor_is_super {
        return Err(Denial::SuperAdminSelfDelete);
    }

    if let Operation::Grant { role: Role::SuperAdmin } = operation {
        if !actor_is_super {
            return Err(Denial::SuperAdminGrantRestricted);
        }
    }

    if actor_is_super {
        return Ok(());
    }

    if is_self
        && matches!(
            operation,
            Operation::Read | Operation::Update | Operation::SendVerification
        )
    {
        return Ok(());
    }

    if !actor.holds(Permission::ManageUsers) {
        return Err(Denial::MissingPermission(Permission::ManageUsers));
    }

    match operation {
        Operation::Read => Ok(()),
        Operation::Update
        | Operation::Grant { .. }
        | Operation::Delete
        | Operation::SendVerification => {
            if target.role.is_super_admin() {
                Err(Denial::ProtectedTarget)
            } else {
                Ok(())
            }
        }
    }
}

pub fn can_act(actor: &Actor, target: &Target, operation: Operation) -> bool {
    authorize(actor, target, operation).is_ok()
}

/// Decide whether `actor` may create a new account holding `role`.
pub fn authorize_creation(actor: &Actor, role: Role) -> Result<(), Denial> {
    if actor.role.is_super_admin() {
        return Ok(());
    }
    if role.is_super_admin() {
        return Err(Denial::SuperAdminCreationRestricted);
    }
    authorize_capability(actor, Permission::ManageUsers)
}

pub fn authorize_capability(actor: &Actor, permission: Permission) -> Result<(), Denial> {
    if actor.holds(permission) {
        Ok(())
    } else {
        Err(Denial::MissingPermission(permission))
    }
}
