//! Administrator session and account management endpoints.
//!
//! Every handler except login takes [`RequireAdmin`], so the acting admin was
//! loaded from the store during this request. Fine-grained decisions go
//! through the evaluator in `auth::permissions` against that fresh record and
//! a freshly loaded target.

use rocket::State;
use rocket::http::{CookieJar, Status};
use rocket::response::status;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

use crate::auth::permissions::{
    Operation, Permission, PermissionSet, Role, authorize, authorize_capability,
    authorize_creation,
};
use crate::auth::responses::{
    AdminListResponse, AdminLoginRequest, AdminLoginResponse, AdminSearchResponse, AdminSummary,
    CreateAdminRequest, MessageResponse, PermissionCatalog, RoleCatalog, UpdateAdminRequest,
    VerificationOutcome, VerificationQueued,
};
use crate::auth::store::{AdminChanges, LookupError, NewAdmin};
use crate::auth::{AdminGate, Api, AuthState, PrincipalKind, RequireAdmin};
use crate::error::ApiError;
use crate::mailer::{dispatch_detached, verification_link, verification_mail};
use crate::routes::helpers::{
    bounded, clear_token_cookie, load_admin, normalize_email, parse_id, require_non_empty,
    require_store, set_token_cookie,
};

fn conflict(err: LookupError) -> ApiError {
    match err {
        LookupError::Conflict(_) => ApiError::Conflict("email or username already in use".into()),
        other => ApiError::from(other),
    }
}

#[openapi(tag = "Admin")]
#[post("/admin/login", data = "<payload>")]
pub async fn login(
    _gate: AdminGate<Api>,
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    payload: Json<AdminLoginRequest>,
) -> Result<Json<AdminLoginResponse>, ApiError> {
    let login = payload.login.trim();
    if login.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Email or username and password are required".into(),
        ));
    }
    let login = if login.contains('@') {
        login.to_lowercase()
    } else {
        login.to_string()
    };

    let store = require_store(state)?;
    let admin = match bounded(state, store.admin_by_login(&login)).await {
        Ok(admin) => Some(admin),
        Err(LookupError::NotFound) => None,
        Err(err) => return Err(err.into()),
    };

    state.passwords.check_login(
        &payload.password,
        admin.as_ref().map(|admin| admin.password_hash.as_str()),
    )?;
    let Some(admin) = admin else {
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    let issued = state.signer.issue(admin.id, PrincipalKind::Admin)?;
    set_token_cookie(
        cookies,
        &state.config,
        &state.config.admin_cookie_name,
        issued.token.clone(),
        issued.expires_at,
    );

    log::info!("admin {} ({}) signed in", admin.username, admin.id);
    Ok(Json(AdminLoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        admin: AdminSummary::from(&admin),
    }))
}

#[openapi(tag = "Admin")]
#[post("/admin/logout")]
pub async fn logout(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
) -> Json<MessageResponse> {
    clear_token_cookie(cookies, &state.config, &state.config.admin_cookie_name);
    log::info!("admin {} signed out", admin.context.admin_id());
    Json(MessageResponse::new("Logged out"))
}

#[openapi(tag = "Admin")]
#[get("/admin/roles")]
pub async fn roles(_admin: RequireAdmin<Api>) -> Json<RoleCatalog> {
    Json(RoleCatalog::full())
}

#[openapi(tag = "Admin")]
#[get("/admin/permissions")]
pub async fn permissions(_admin: RequireAdmin<Api>) -> Json<PermissionCatalog> {
    Json(PermissionCatalog::full())
}

#[openapi(tag = "Admin")]
#[get("/admin/all")]
pub async fn list_admins(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
) -> Result<Json<AdminListResponse>, ApiError> {
    authorize_capability(&admin.account.actor(), Permission::ManageUsers)?;

    let store = require_store(state)?;
    let admins: Vec<AdminSummary> = bounded(state, store.list_admins())
        .await?
        .iter()
        .map(AdminSummary::from)
        .collect();

    Ok(Json(AdminListResponse {
        count: admins.len(),
        admins,
    }))
}

#[openapi(tag = "Admin")]
#[get("/admin/<id>")]
pub async fn get_admin(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
    id: String,
) -> Result<Json<AdminSummary>, ApiError> {
    let id = parse_id(&id)?;
    let target = load_admin(state, id).await?;
    authorize(&admin.account.actor(), &target.target(), Operation::Read)?;

    Ok(Json(AdminSummary::from(&target)))
}

#[openapi(tag = "Admin")]
#[get("/admin/u/<username>")]
pub async fn get_admin_by_username(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
    username: String,
) -> Result<Json<AdminSummary>, ApiError> {
    let store = require_store(state)?;
    let target = bounded(state, store.admin_by_username(username.trim()))
        .await
        .map_err(|err| match err {
            LookupError::NotFound => ApiError::NotFound(format!("Admin '{username}' not found")),
            other => ApiError::from(other),
        })?;
    authorize(&admin.account.actor(), &target.target(), Operation::Read)?;

    Ok(Json(AdminSummary::from(&target)))
}

/// Exact match on email (case insensitive) or username.
#[openapi(tag = "Admin")]
#[get("/admin/search/<query>")]
pub async fn search_admins(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
    query: String,
) -> Result<Json<AdminSearchResponse>, ApiError> {
    authorize_capability(&admin.account.actor(), Permission::ManageUsers)?;

    let query = query.trim().to_string();
    require_non_empty("query", &query)?;

    let store = require_store(state)?;
    let results: Vec<AdminSummary> = bounded(state, store.search_admins(&query))
        .await?
        .iter()
        .map(AdminSummary::from)
        .collect();

    Ok(Json(AdminSearchResponse {
        message: "Search completed successfully".into(),
        query,
        count: results.len(),
        results,
    }))
}

#[openapi(tag = "Admin")]
#[post("/admin/create", data = "<payload>")]
pub async fn create_admin(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
    payload: Json<CreateAdminRequest>,
) -> Result<status::Custom<Json<AdminSummary>>, ApiError> {
    let payload = payload.into_inner();
    authorize_creation(&admin.account.actor(), payload.role)?;

    let email = normalize_email(&payload.email)?;
    require_non_empty("username", &payload.username)?;
    require_non_empty("name", &payload.name)?;
    require_non_empty("password", &payload.password)?;

    let permissions = match payload.role {
        Role::SuperAdmin => PermissionSet::all(),
        _ => payload.permissions,
    };

    let store = require_store(state)?;
    let password_hash = state.passwords.hash_password(&payload.password)?;
    let created = bounded(
        state,
        store.insert_admin(NewAdmin {
            email,
            username: payload.username.trim().to_string(),
            name: payload.name.trim().to_string(),
            password_hash,
            role: payload.role,
            permissions,
        }),
    )
    .await
    .map_err(conflict)?;

    log::info!(
        "admin {} created {} account {}",
        admin.account.id,
        created.role,
        created.id
    );
    Ok(status::Custom(
        Status::Created,
        Json(AdminSummary::from(&created)),
    ))
}

#[openapi(tag = "Admin")]
#[put("/admin/<id>", data = "<payload>")]
pub async fn update_admin(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
    id: String,
    payload: Json<UpdateAdminRequest>,
) -> Result<Json<AdminSummary>, ApiError> {
    let id = parse_id(&id)?;
    let payload = payload.into_inner();
    let target = load_admin(state, id).await?;

    let mut changes = AdminChanges {
        email: payload.email.as_deref().map(normalize_email).transpose()?,
        username: payload.username.map(|value| value.trim().to_string()),
        name: payload.name.map(|value| value.trim().to_string()),
        password_hash: None,
        role: payload.role,
        permissions: payload.permissions,
    };
    if let Some(username) = &changes.username {
        require_non_empty("username", username)?;
    }
    if let Some(name) = &changes.name {
        require_non_empty("name", name)?;
    }

    let operation = if changes.touches_grants() {
        Operation::Grant {
            role: changes.role.unwrap_or(target.role),
        }
    } else {
        Operation::Update
    };
    authorize(&admin.account.actor(), &target.target(), operation)?;

    if let Some(password) = &payload.password {
        require_non_empty("password", password)?;
        changes.password_hash = Some(state.passwords.hash_password(password)?);
    }

    let store = require_store(state)?;
    let updated = bounded(state, store.update_admin(id, changes))
        .await
        .map_err(|err| match err {
            LookupError::NotFound => ApiError::NotFound(format!("Admin {id} not found")),
            other => conflict(other),
        })?;

    log::info!("admin {} updated account {}", admin.account.id, updated.id);
    Ok(Json(AdminSummary::from(&updated)))
}

#[openapi(tag = "Admin")]
#[delete("/admin/<id>")]
pub async fn delete_admin(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
    id: String,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;
    let target = load_admin(state, id).await?;
    authorize(&admin.account.actor(), &target.target(), Operation::Delete)?;

    let store = require_store(state)?;
    bounded(state, store.delete_admin(id))
        .await
        .map_err(|err| match err {
            LookupError::NotFound => ApiError::NotFound(format!("Admin {id} not found")),
            other => ApiError::from(other),
        })?;

    log::info!("admin {} deleted account {}", admin.account.id, id);
    Ok(Json(MessageResponse::new("Admin deleted")))
}

#[openapi(tag = "Admin")]
#[post("/admin/send-verification/<id>")]
pub async fn send_verification(
    admin: RequireAdmin<Api>,
    state: &State<AuthState>,
    id: String,
) -> Result<Json<VerificationQueued>, ApiError> {
    let id = parse_id(&id)?;
    let target = load_admin(state, id).await?;
    authorize(
        &admin.account.actor(),
        &target.target(),
        Operation::SendVerification,
    )?;

    let link = verification_link(&state.config.api_url, target.id);
    dispatch_detached(
        state.mailer.clone(),
        verification_mail(&target.email, &target.name, &link),
    );

    Ok(Json(VerificationQueued {
        message: "Verification email queued for sending".into(),
        admin: AdminSummary::from(&target),
    }))
}

/// Target of the link mailed by `send_verification`. Reachable without a
/// session.
#[openapi(tag = "Admin")]
#[get("/admin/verify/<id>")]
pub async fn verify_admin(
    _gate: AdminGate<Api>,
    state: &State<AuthState>,
    id: String,
) -> Result<status::Custom<Json<VerificationOutcome>>, ApiError> {
    let id = parse_id(&id)?;
    let target = load_admin(state, id).await?;
    if target.verified {
        return Ok(VerificationOutcome::respond(target.id, true));
    }

    let store = require_store(state)?;
    let verified = bounded(state, store.verify_admin(id))
        .await
        .map_err(|err| match err {
            LookupError::NotFound => ApiError::NotFound(format!("Admin {id} not found")),
            other => ApiError::from(other),
        })?;

    log::info!("admin {} confirmed their email", verified.id);
    Ok(VerificationOutcome::respond(verified.id, false))
}
