//! Account registration and session endpoints for end users.

use rocket::State;
use rocket::http::{CookieJar, Status};
use rocket::response::status;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

use crate::auth::responses::{
    LoginRequest, LoginResponse, MessageResponse, RegisterRequest, UserSummary,
    VerificationOutcome,
};
use crate::auth::store::{LookupError, NewUser};
use crate::auth::{Api, AuthState, AuthUser, PrincipalKind, UserGate};
use crate::error::ApiError;
use crate::mailer::{dispatch_detached, email_verification_link, user_verification_mail};
use crate::routes::helpers::{
    bounded, clear_token_cookie, normalize_email, parse_id, require_non_empty, require_store,
    set_token_cookie,
};

#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<payload>")]
pub async fn register(
    _gate: UserGate<Api>,
    state: &State<AuthState>,
    payload: Json<RegisterRequest>,
) -> Result<status::Custom<Json<UserSummary>>, ApiError> {
    let payload = payload.into_inner();
    let email = normalize_email(&payload.email)?;
    require_non_empty("first_name", &payload.first_name)?;
    require_non_empty("last_name", &payload.last_name)?;
    require_non_empty("password", &payload.password)?;

    let store = require_store(state)?;
    let password_hash = state.passwords.hash_password(&payload.password)?;

    let user = bounded(
        state,
        store.insert_user(NewUser {
            email,
            first_name: payload.first_name.trim().to_string(),
            last_name: payload.last_name.trim().to_string(),
            password_hash,
        }),
    )
    .await
    .map_err(|err| match err {
        LookupError::Conflict(_) => ApiError::Conflict("email already registered".into()),
        other => ApiError::from(other),
    })?;

    log::info!("registered user {}", user.id);
    let link = email_verification_link(&state.config.api_url, user.id);
    dispatch_detached(
        state.mailer.clone(),
        user_verification_mail(&user.email, &user.first_name, &link),
    );

    Ok(status::Custom(Status::Created, Json(UserSummary::from(&user))))
}

/// Target of the link mailed on registration.
#[openapi(tag = "Auth")]
#[get("/auth/verify-email?<uid>")]
pub async fn verify_email(
    _gate: UserGate<Api>,
    state: &State<AuthState>,
    uid: Option<String>,
) -> Result<status::Custom<Json<VerificationOutcome>>, ApiError> {
    let Some(uid) = uid.filter(|uid| !uid.trim().is_empty()) else {
        return Err(ApiError::BadRequest("uid query parameter is required".into()));
    };
    let uid = parse_id(uid.trim())?;

    let store = require_store(state)?;
    let not_found = |err: LookupError| match err {
        LookupError::NotFound => ApiError::NotFound(format!("User {uid} not found")),
        other => ApiError::from(other),
    };
    let user = bounded(state, store.user_by_id(uid)).await.map_err(not_found)?;
    if user.verified {
        return Ok(VerificationOutcome::respond(user.id, true));
    }

    let user = bounded(state, store.verify_user(uid)).await.map_err(not_found)?;
    log::info!("user {} confirmed their email", user.id);
    Ok(VerificationOutcome::respond(user.id, false))
}

#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    _gate: UserGate<Api>,
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    payload: Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".into()));
    }

    let store = require_store(state)?;
    let user = match bounded(state, store.user_by_email(&email)).await {
        Ok(user) => Some(user),
        Err(LookupError::NotFound) => None,
        Err(err) => return Err(err.into()),
    };

    state.passwords.check_login(
        &payload.password,
        user.as_ref().map(|user| user.password_hash.as_str()),
    )?;
    let Some(user) = user else {
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    let issued = state.signer.issue(user.id, PrincipalKind::User)?;
    set_token_cookie(
        cookies,
        &state.config,
        &state.config.session_cookie_name,
        issued.token.clone(),
        issued.expires_at,
    );

    log::info!("user {} signed in", user.id);
    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user: UserSummary::from(&user),
    }))
}

#[openapi(tag = "Auth")]
#[post("/auth/logout")]
pub async fn logout(
    gate: UserGate<Api>,
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
) -> Json<MessageResponse> {
    clear_token_cookie(cookies, &state.config, &state.config.session_cookie_name);
    if let Some(context) = gate.context() {
        log::info!("user {} signed out", context.uid());
    }
    Json(MessageResponse::new("Logged out"))
}

#[openapi(tag = "Auth")]
#[get("/auth/me")]
pub async fn me(current: AuthUser<Api>) -> Json<UserSummary> {
    Json(UserSummary::from(&current.user))
}
