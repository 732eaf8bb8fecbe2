//! Liveness endpoint used for readiness checks and tests.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::auth::AuthState;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    pub status: String,
    /// False when the server runs without a credential store; admin routes
    /// then answer 503.
    pub credential_store: bool,
}

#[openapi(tag = "Health")]
#[get("/health")]
pub fn health_check(state: &State<AuthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        credential_store: state.store.is_some(),
    })
}
