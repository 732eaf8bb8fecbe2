//! Shared helper functions for Rocket route handlers.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::http::{Cookie, CookieJar};
use uuid::Uuid;

use crate::auth::store::{self, AdminAccount, CredentialStore, LookupError, LookupResult};
use crate::auth::{AuthConfig, AuthState};
use crate::error::ApiError;

/// Parse a path identifier, answering 400 when it is not a UUID.
pub fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("'{raw}' is not a valid id")))
}

pub fn require_store(state: &AuthState) -> Result<&Arc<dyn CredentialStore>, ApiError> {
    state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("credential store not configured".into()))
}

/// Run a store call under the configured request deadline.
pub async fn bounded<T>(
    state: &AuthState,
    lookup: impl Future<Output = LookupResult<T>>,
) -> LookupResult<T> {
    store::within(state.config.lookup_timeout, lookup).await
}

pub async fn load_admin(state: &AuthState, id: Uuid) -> Result<AdminAccount, ApiError> {
    let store = require_store(state)?;
    bounded(state, store.admin_by_id(id))
        .await
        .map_err(|err| match err {
            LookupError::NotFound => ApiError::NotFound(format!("Admin {id} not found")),
            other => ApiError::from(other),
        })
}

pub fn require_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::BadRequest("email must contain '@'".into()));
    }
    Ok(email)
}

/// Store a freshly issued token in the cookie `name`.
pub fn set_token_cookie(
    jar: &CookieJar<'_>,
    config: &AuthConfig,
    name: &str,
    token: String,
    expires_at: DateTime<Utc>,
) {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    let mut cookie = Cookie::build((name.to_string(), token))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(config.cookie_same_site)
        .max_age(time::Duration::seconds(max_age))
        .build();
    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    jar.add(cookie);
}

pub fn clear_token_cookie(jar: &CookieJar<'_>, config: &AuthConfig, name: &str) {
    let mut cookie = Cookie::build(name.to_string()).path("/").build();
    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    jar.remove(cookie);
}
