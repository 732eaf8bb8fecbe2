use std::time::Duration;

use rocket::http::SameSite;

use crate::auth::{AuthError, AuthResult};

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Login and registration routes reachable without a token, for both the
/// server-rendered pages and any versioned API prefix.
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    r"^/auth/(login|register|verify-email)$",
    r"^/api/.*/auth/(login|register|verify-email)$",
];

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub token_ttl: Duration,
    pub lookup_timeout: Duration,
    pub session_cookie_name: String,
    pub admin_cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub login_page: String,
    pub admin_login_page: String,
    pub public_paths: Vec<String>,
    pub api_url: String,
}

impl AuthConfig {
    /// Defaults for everything except the signing secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            issuer: "everato".into(),
            token_ttl: DEFAULT_TOKEN_TTL,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            session_cookie_name: "jwt".into(),
            admin_cookie_name: "admin_jwt".into(),
            cookie_domain: None,
            cookie_secure: false,
            cookie_same_site: SameSite::Lax,
            login_page: "/auth/login".into(),
            admin_login_page: "/admin/login".into(),
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
            api_url: "http://localhost:8000/api/v1".into(),
        }
    }

    pub fn from_env() -> AuthResult<Self> {
        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| AuthError::Config("JWT_SECRET is required".into()))?;

        let mut config = Self::with_secret(jwt_secret);

        if let Ok(issuer) = std::env::var("APP_NAME") {
            config.issuer = issuer;
        }
        config.token_ttl = parse_duration_or(
            "JWT_EXPIRATION",
            std::env::var("JWT_EXPIRATION").ok().as_deref(),
            DEFAULT_TOKEN_TTL,
        );
        config.lookup_timeout = parse_duration_or(
            "REQUEST_TIMEOUT",
            std::env::var("REQUEST_TIMEOUT").ok().as_deref(),
            DEFAULT_LOOKUP_TIMEOUT,
        );
        if let Ok(name) = std::env::var("EVERATO_SESSION_COOKIE") {
            config.session_cookie_name = name;
        }
        if let Ok(name) = std::env::var("EVERATO_ADMIN_COOKIE") {
            config.admin_cookie_name = name;
        }
        config.cookie_domain = std::env::var("EVERATO_COOKIE_DOMAIN").ok();
        config.cookie_secure = std::env::var("EVERATO_COOKIE_SECURE")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(false);
        if let Ok(value) = std::env::var("EVERATO_COOKIE_SAMESITE") {
            config.cookie_same_site = parse_same_site(&value)?;
        }
        if let Ok(page) = std::env::var("EVERATO_LOGIN_PAGE") {
            config.login_page = page;
        }
        if let Ok(page) = std::env::var("EVERATO_ADMIN_LOGIN_PAGE") {
            config.admin_login_page = page;
        }
        if let Ok(paths) = std::env::var("EVERATO_PUBLIC_PATHS") {
            config.public_paths = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(url) = std::env::var("API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }
}

/// Parse a humantime duration ("12h", "90m"), falling back to `default`
/// when the value is missing or malformed. Startup never fails on a bad
/// duration.
pub fn parse_duration_or(name: &str, value: Option<&str>, default: Duration) -> Duration {
    let Some(raw) = value else {
        return default;
    };

    match humantime::parse_duration(raw.trim()) {
        Ok(duration) if !duration.is_zero() => duration,
        Ok(_) => {
            log::warn!("{name} must be positive, falling back to {:?}", default);
            default
        }
        Err(err) => {
            log::warn!("invalid {name} '{raw}' ({err}), falling back to {:?}", default);
            default
        }
    }
}

fn parse_same_site(value: &str) -> AuthResult<SameSite> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" => Ok(SameSite::None),
        other => Err(AuthError::Config(format!(
            "EVERATO_COOKIE_SAMESITE must be lax, strict or none (got '{other}')"
        ))),
    }
}
