use rocket::Request;

use crate::auth::AuthConfig;

/// Which principal a guard is looking for. Admin guards also look at the
/// dedicated admin cookie, ahead of the shared session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    User,
    Admin,
}

/// Return the scheme-less token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Pick the first non-empty candidate in scope priority order.
pub fn select_token<'a>(
    scope: TokenScope,
    admin_cookie: Option<&'a str>,
    session_cookie: Option<&'a str>,
    authorization: Option<&'a str>,
) -> Option<&'a str> {
    let admin_cookie = match scope {
        TokenScope::Admin => admin_cookie,
        TokenScope::User => None,
    };

    admin_cookie
        .filter(|value| !value.is_empty())
        .or_else(|| session_cookie.filter(|value| !value.is_empty()))
        .or_else(|| authorization.and_then(bearer_token))
}

/// Candidate token for `scope`, or an empty string when the request carries
/// none. Never fails.
pub fn extract_token(request: &Request<'_>, config: &AuthConfig, scope: TokenScope) -> String {
    let cookies = request.cookies();
    let admin_cookie = cookies
        .get(&config.admin_cookie_name)
        .map(|cookie| cookie.value());
    let session_cookie = cookies
        .get(&config.session_cookie_name)
        .map(|cookie| cookie.value());
    let authorization = request.headers().get_one("Authorization");

    select_token(scope, admin_cookie, session_cookie, authorization)
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("BEARER abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[test]
    fn user_scope_prefers_session_cookie_over_header() {
        let token = select_token(
            TokenScope::User,
            Some("admin"),
            Some("session"),
            Some("Bearer header"),
        );
        assert_eq!(token, Some("session"));

        let token = select_token(TokenScope::User, Some("admin"), None, Some("Bearer header"));
        assert_eq!(token, Some("header"));
    }

    #[test]
    fn admin_scope_prefers_admin_cookie() {
        assert_eq!(
            select_token(
                TokenScope::Admin,
                Some("admin"),
                Some("session"),
                Some("Bearer header")
            ),
            Some("admin")
        );
        assert_eq!(
            select_token(TokenScope::Admin, None, Some("session"), Some("Bearer header")),
            Some("session")
        );
        assert_eq!(
            select_token(TokenScope::Admin, None, None, Some("Bearer header")),
            Some("header")
        );
    }

    #[test]
    fn empty_cookies_count_as_absent() {
        assert_eq!(
            select_token(TokenScope::Admin, Some(""), Some(""), Some("Bearer header")),
            Some("header")
        );
        assert_eq!(select_token(TokenScope::User, None, Some(""), None), None);
    }
}
