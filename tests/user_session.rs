use std::sync::Arc;

use everato_api::auth::responses::{LoginResponse, UserSummary, VerificationOutcome};
use everato_api::auth::{CredentialStore, PasswordService, PrincipalKind, TokenSigner};
use everato_api::error::ErrorResponse;
use everato_api::test_support::{InMemoryCredentialStore, TestRocketBuilder, test_auth_config};
use everato_api::{api_routes, view_routes};
use rocket::http::{ContentType, Cookie, Header, Status};
use rocket::local::blocking::Client;
use rocket::serde::json::json;
use uuid::Uuid;

fn client_with(store: Arc<InMemoryCredentialStore>) -> Client {
    TestRocketBuilder::new()
        .with_store(Some(store as Arc<dyn CredentialStore>))
        .mount_api_routes(api_routes())
        .mount_view_routes(view_routes())
        .blocking_client()
}

fn signer() -> TokenSigner {
    TokenSigner::from_config(&test_auth_config()).expect("signer")
}

#[test]
fn register_login_and_me_round_trip() {
    let client = client_with(Arc::new(InMemoryCredentialStore::new()));

    let response = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(
            json!({
                "email": "Ada@Example.com",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "password": "analytical-engine"
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(response.status(), Status::Created);
    let registered: UserSummary = response.into_json().expect("user summary");
    assert_eq!(registered.email, "ada@example.com");

    let response = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(json!({ "email": "ada@example.com", "password": "analytical-engine" }).to_string())
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let cookie = response.cookies().get("jwt").expect("session cookie").clone();
    assert_eq!(cookie.http_only(), Some(true));
    let login: LoginResponse = response.into_json().expect("login body");
    assert_eq!(login.user.id, registered.id);
    assert_eq!(cookie.value(), login.token);

    // The tracked client now replays the session cookie.
    let response = client.get("/api/v1/auth/me").dispatch();
    assert_eq!(response.status(), Status::Ok);
    let me: UserSummary = response.into_json().expect("me body");
    assert_eq!(me.id, registered.id);
}

#[test]
fn duplicate_registration_conflicts() {
    let client = client_with(Arc::new(InMemoryCredentialStore::new()));
    let body = json!({
        "email": "dup@example.com",
        "first_name": "D",
        "last_name": "Up",
        "password": "pw"
    })
    .to_string();

    let first = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(body.clone())
        .dispatch();
    assert_eq!(first.status(), Status::Created);

    let second = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(body)
        .dispatch();
    assert_eq!(second.status(), Status::Conflict);
}

#[test]
fn wrong_password_and_unknown_email_look_the_same() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let hash = PasswordService::new()
        .expect("password service")
        .hash_password("right")
        .expect("hash");
    store.seed_user("known@example.com", &hash);
    let client = client_with(store);

    let wrong = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(json!({ "email": "known@example.com", "password": "wrong" }).to_string())
        .dispatch();
    assert_eq!(wrong.status(), Status::Unauthorized);
    let wrong_body = wrong.into_string();

    let unknown = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(json!({ "email": "nobody@example.com", "password": "wrong" }).to_string())
        .dispatch();
    assert_eq!(unknown.status(), Status::Unauthorized);
    assert_eq!(unknown.into_string(), wrong_body);
}

#[test]
fn protected_api_route_answers_json_401() {
    let client = client_with(Arc::new(InMemoryCredentialStore::new()));

    for request in [
        client.get("/api/v1/auth/me"),
        client
            .get("/api/v1/auth/me")
            .header(Header::new("Authorization", "Bearer not-a-jwt")),
        client
            .get("/api/v1/auth/me")
            .header(Header::new("Authorization", "Basic Zm9vOmJhcg==")),
    ] {
        let response = request.dispatch();
        assert_eq!(response.status(), Status::Unauthorized);
        assert_eq!(response.content_type(), Some(ContentType::JSON));
        let body: ErrorResponse = response.into_json().expect("gate body");
        assert_eq!(body.error, "Unauthorized");
        assert_eq!(body.message, "Authentication required");
    }
}

#[test]
fn bearer_token_for_unknown_user_is_rejected() {
    let client = client_with(Arc::new(InMemoryCredentialStore::new()));
    let issued = signer()
        .issue(Uuid::new_v4(), PrincipalKind::User)
        .expect("issue");

    let response = client
        .get("/api/v1/auth/me")
        .header(Header::new(
            "Authorization",
            format!("Bearer {}", issued.token),
        ))
        .dispatch();
    assert_eq!(response.status(), Status::Unauthorized);
}

#[test]
fn bearer_header_authenticates_without_cookie() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let user = store.seed_user("bearer@example.com", "unused");
    let client = client_with(store);
    let issued = signer().issue(user.id, PrincipalKind::User).expect("issue");

    let response = client
        .get("/api/v1/auth/me")
        .header(Header::new(
            "Authorization",
            format!("bearer {}", issued.token),
        ))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let me: UserSummary = response.into_json().expect("me body");
    assert_eq!(me.id, user.id);
}

#[test]
fn session_cookie_wins_over_bearer_header() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let cookie_user = store.seed_user("cookie@example.com", "unused");
    let header_user = store.seed_user("header@example.com", "unused");
    let client = client_with(store);
    let signer = signer();
    let cookie_token = signer
        .issue(cookie_user.id, PrincipalKind::User)
        .expect("issue");
    let header_token = signer
        .issue(header_user.id, PrincipalKind::User)
        .expect("issue");

    let response = client
        .get("/api/v1/auth/me")
        .cookie(Cookie::new("jwt", cookie_token.token))
        .header(Header::new(
            "Authorization",
            format!("Bearer {}", header_token.token),
        ))
        .dispatch();
    let me: UserSummary = response.into_json().expect("me body");
    assert_eq!(me.id, cookie_user.id);
}

#[test]
fn pages_redirect_anonymous_visitors_to_login() {
    let client = client_with(Arc::new(InMemoryCredentialStore::new()));

    let response = client.get("/dashboard").dispatch();
    assert_eq!(response.status(), Status::Found);
    assert_eq!(response.headers().get_one("Location"), Some("/auth/login"));

    let response = client
        .get("/dashboard")
        .cookie(Cookie::new("jwt", "tampered"))
        .dispatch();
    assert_eq!(response.status(), Status::Found);
    assert_eq!(response.headers().get_one("Location"), Some("/auth/login"));
}

#[test]
fn login_page_is_public() {
    let client = client_with(Arc::new(InMemoryCredentialStore::new()));

    let response = client.get("/auth/login").dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::HTML));
}

#[test]
fn signed_in_user_sees_dashboard() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let user = store.seed_user("dash@example.com", "unused");
    let client = client_with(store);
    let issued = signer().issue(user.id, PrincipalKind::User).expect("issue");

    let response = client
        .get("/dashboard")
        .cookie(Cookie::new("jwt", issued.token))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert!(
        response
            .into_string()
            .expect("page body")
            .contains("dash@example.com")
    );
}

#[test]
fn logout_clears_the_session_cookie() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let user = store.seed_user("bye@example.com", "unused");
    let client = client_with(store);
    let issued = signer().issue(user.id, PrincipalKind::User).expect("issue");

    let response = client
        .post("/api/v1/auth/logout")
        .cookie(Cookie::new("jwt", issued.token))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert!(
        response
            .headers()
            .get("Set-Cookie")
            .any(|value| value.starts_with("jwt=;") && value.contains("Max-Age=0")),
        "logout should expire the session cookie"
    );
}

#[test]
fn verify_email_reports_unknown_and_malformed_uids() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let seeded = store.seed_user("known@example.com", "unused");
    let client = client_with(store);

    let response = client
        .get(format!("/api/v1/auth/verify-email?uid={}", Uuid::new_v4()))
        .dispatch();
    assert_eq!(response.status(), Status::NotFound);

    let response = client.get("/api/v1/auth/verify-email").dispatch();
    assert_eq!(response.status(), Status::BadRequest);

    let response = client.get("/api/v1/auth/verify-email?uid=42").dispatch();
    assert_eq!(response.status(), Status::BadRequest);

    // Seeded users start out verified.
    let response = client
        .get(format!("/api/v1/auth/verify-email?uid={}", seeded.id))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let outcome: VerificationOutcome = response.into_json().expect("outcome");
    assert_eq!(outcome.id, seeded.id);
    assert!(outcome.already_verified);
}
