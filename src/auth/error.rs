use rocket::http::Status;
use thiserror::Error;

use crate::auth::permissions::Denial;

pub type AuthResult<T> = Result<T, AuthError>;

/// Failure classes produced by the token signer, the guards and the login flows.
///
/// Variants carry owned strings only so a guard outcome can be cached on the
/// request and handed to catchers by value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("principal not found")]
    PrincipalNotFound,
    #[error("forbidden: {0}")]
    AuthorizationDenied(Denial),
    #[error("credential store unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("credential lookup timed out")]
    Timeout,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("argon2 parameter error: {0}")]
    Argon2(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::PrincipalNotFound
            | AuthError::InvalidCredentials => Status::Unauthorized,
            AuthError::AuthorizationDenied(_) => Status::Forbidden,
            AuthError::DependencyUnavailable(_) => Status::ServiceUnavailable,
            AuthError::Timeout => Status::RequestTimeout,
            AuthError::Config(_)
            | AuthError::Signing(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => Status::InternalServerError,
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Every authentication failure collapses to the same text so a client
    /// cannot tell a missing token from a forged or expired one.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken | AuthError::PrincipalNotFound => {
                "Authentication required".to_string()
            }
            AuthError::InvalidCredentials => "Invalid credentials".to_string(),
            AuthError::AuthorizationDenied(denial) => denial.to_string(),
            AuthError::DependencyUnavailable(_) => "Service temporarily unavailable".to_string(),
            AuthError::Timeout => "Request timed out".to_string(),
            AuthError::Config(_)
            | AuthError::Signing(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => "Internal server error".to_string(),
        }
    }

    pub fn is_authentication_failure(&self) -> bool {
        self.status() == Status::Unauthorized
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Argon2(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

impl From<Denial> for AuthError {
    fn from(denial: Denial) -> Self {
        AuthError::AuthorizationDenied(denial)
    }
}
