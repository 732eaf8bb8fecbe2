use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::response::{Redirect, status};
use rocket::serde::json::Json;
use rocket::{Catcher, Request};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::guards::{Rejection, ResponseMode, last_rejection};
use crate::auth::permissions::{Permission, PermissionSet, Role};
use crate::auth::store::{AdminAccount, UserAccount};
use crate::error::ErrorResponse;

// ===== Requests =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdminLoginRequest {
    /// Email address or username.
    #[serde(alias = "email", alias = "username")]
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateAdminRequest {
    pub email: String,
    pub username: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: PermissionSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UpdateAdminRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub permissions: Option<PermissionSet>,
}

// ===== Responses =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&UserAccount> for UserSummary {
    fn from(user: &UserAccount) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            verified: user.verified,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdminSummary {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub permissions: PermissionSet,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&AdminAccount> for AdminSummary {
    fn from(admin: &AdminAccount) -> Self {
        Self {
            id: admin.id,
            email: admin.email.clone(),
            username: admin.username.clone(),
            name: admin.name.clone(),
            role: admin.role,
            permissions: admin.permissions.clone(),
            verified: admin.verified,
            created_at: admin.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdminLoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub admin: AdminSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdminListResponse {
    pub count: usize,
    pub admins: Vec<AdminSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoleInfo {
    pub value: Role,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoleCatalog {
    pub count: usize,
    pub roles: Vec<RoleInfo>,
}

impl RoleCatalog {
    pub fn full() -> Self {
        let roles: Vec<RoleInfo> = Role::ALL
            .into_iter()
            .map(|role| RoleInfo {
                value: role,
                description: role.description().to_string(),
            })
            .collect();
        Self {
            count: roles.len(),
            roles,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PermissionInfo {
    pub value: Permission,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PermissionCatalog {
    pub count: usize,
    pub permissions: Vec<PermissionInfo>,
}

impl PermissionCatalog {
    pub fn full() -> Self {
        let permissions: Vec<PermissionInfo> = Permission::ALL
            .into_iter()
            .map(|permission| PermissionInfo {
                value: permission,
                description: permission.description().to_string(),
            })
            .collect();
        Self {
            count: permissions.len(),
            permissions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerificationQueued {
    pub message: String,
    pub admin: AdminSummary,
}

/// Result of following a verification link. `already_verified` is set when
/// the address had been confirmed before.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerificationOutcome {
    pub message: String,
    pub id: Uuid,
    pub already_verified: bool,
}

impl VerificationOutcome {
    pub fn respond(id: Uuid, already_verified: bool) -> status::Custom<Json<Self>> {
        let (status, message) = if already_verified {
            (Status::Ok, "Account is already verified")
        } else {
            (Status::Accepted, "Account verified successfully")
        };
        status::Custom(
            status,
            Json(Self {
                message: message.to_string(),
                id,
                already_verified,
            }),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdminSearchResponse {
    pub message: String,
    pub query: String,
    pub count: usize,
    pub results: Vec<AdminSummary>,
}

// ===== Gate failures =====

#[derive(Responder)]
pub enum GateFailure {
    Redirect(Redirect),
    Body(status::Custom<Json<ErrorResponse>>),
}

fn body(status: Status, message: String) -> GateFailure {
    GateFailure::Body(status::Custom(status, Json(ErrorResponse::new(status, message))))
}

/// Render a failed request, honouring the response mode of the gate that
/// rejected it. Requests that never reached a gate get a generic body.
pub fn render_failure(status: Status, request: &Request<'_>) -> GateFailure {
    match last_rejection(request) {
        Some(Rejection {
            mode: ResponseMode::Redirect { location },
            error,
        }) if error.is_authentication_failure() => {
            log::debug!("redirecting {} to {location}: {error}", request.uri());
            GateFailure::Redirect(Redirect::found(location))
        }
        Some(Rejection { error, .. }) => body(error.status(), error.client_message()),
        None => body(status, status.reason_lossy().to_string()),
    }
}

#[catch(default)]
pub fn gate_failure(status: Status, request: &Request<'_>) -> GateFailure {
    render_failure(status, request)
}

pub fn catchers() -> Vec<Catcher> {
    catchers![gate_failure]
}
