use okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::response::OpenApiResponderInner;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::auth::AuthError;
use crate::auth::permissions::Denial;
use crate::auth::store::LookupError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Timeout,
    Unavailable(String),
    InternalError(String),
}

/// JSON body of every failed API request, whether it came from a handler
/// or from an auth gate.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            error: error_kind(status).to_string(),
            message: message.into(),
        }
    }
}

fn error_kind(status: Status) -> &'static str {
    match status.code {
        400 => "BadRequest",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        408 => "Timeout",
        409 => "Conflict",
        503 => "ServiceUnavailable",
        500 => "InternalError",
        _ => status.reason().unwrap_or("Error"),
    }
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::Unauthorized(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::Timeout => Status::RequestTimeout,
            ApiError::Unavailable(_) => Status::ServiceUnavailable,
            ApiError::InternalError(_) => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                msg
            }
            ApiError::Unauthorized(msg) => {
                log::debug!("unauthorized: {}", msg);
                msg
            }
            ApiError::Forbidden(msg) => {
                log::info!("forbidden: {}", msg);
                msg
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                msg
            }
            ApiError::Conflict(msg) => {
                log::debug!("conflict: {}", msg);
                msg
            }
            ApiError::Timeout => {
                log::warn!("request deadline exceeded");
                "Request timed out".to_string()
            }
            ApiError::Unavailable(msg) => {
                log::error!("dependency unavailable: {}", msg);
                "Service temporarily unavailable".to_string()
            }
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                "Internal server error".to_string()
            }
        };

        let error_response = ErrorResponse::new(status, message);

        let json = serde_json::to_string(&error_response)
            .unwrap_or_else(|_| r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Malformed identifier or request body"),
            ("401", "Authentication required or invalid credentials"),
            ("403", "The acting admin lacks the required privilege"),
            ("404", "Target record does not exist"),
            ("408", "Credential store lookup exceeded the request deadline"),
            ("409", "Email or username already in use"),
            ("503", "Credential store unavailable"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken | AuthError::PrincipalNotFound => {
                ApiError::Unauthorized(err.client_message())
            }
            AuthError::InvalidCredentials => ApiError::Unauthorized(err.client_message()),
            AuthError::AuthorizationDenied(denial) => ApiError::Forbidden(denial.to_string()),
            AuthError::DependencyUnavailable(msg) => ApiError::Unavailable(msg),
            AuthError::Timeout => ApiError::Timeout,
            AuthError::Config(_)
            | AuthError::Signing(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        ApiError::Forbidden(denial.to_string())
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound => ApiError::NotFound("Resource not found".to_string()),
            LookupError::Conflict(msg) => ApiError::Conflict(msg),
            LookupError::Database(msg) => ApiError::Unavailable(msg),
            LookupError::DeadlineExceeded => ApiError::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_faults_map_to_distinct_statuses() {
        assert_eq!(ApiError::from(LookupError::NotFound).status(), Status::NotFound);
        assert_eq!(
            ApiError::from(LookupError::Conflict("dup".into())).status(),
            Status::Conflict
        );
        assert_eq!(
            ApiError::from(LookupError::Database("down".into())).status(),
            Status::ServiceUnavailable
        );
        assert_eq!(
            ApiError::from(LookupError::DeadlineExceeded).status(),
            Status::RequestTimeout
        );
    }

    #[test]
    fn error_bodies_name_the_failure_kind() {
        let body = ErrorResponse::new(Status::ServiceUnavailable, "down");
        assert_eq!(body.error, "ServiceUnavailable");
        assert_eq!(ErrorResponse::new(Status::Unauthorized, "x").error, "Unauthorized");
        assert_eq!(ErrorResponse::new(Status::RequestTimeout, "x").error, "Timeout");
        assert_eq!(ErrorResponse::new(Status::ImATeapot, "x").error, "I'm a teapot");
    }

    #[test]
    fn auth_errors_keep_their_status() {
        for err in [
            AuthError::InvalidToken,
            AuthError::InvalidCredentials,
            AuthError::Timeout,
            AuthError::DependencyUnavailable("x".into()),
            AuthError::AuthorizationDenied(Denial::ProtectedTarget),
            AuthError::Config("x".into()),
        ] {
            let expected = err.status();
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }
}
