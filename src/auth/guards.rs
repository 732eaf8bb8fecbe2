//! Route-group gates.
//!
//! [`AuthGuard`] and [`AdminGuard`] hold the decision logic and are plain
//! values that can be exercised without a server. The Rocket request guards
//! at the bottom of the file ([`UserGate`], [`AuthUser`], [`AdminGate`],
//! [`RequireAdmin`]) pick the guard instance for their response mode, run it,
//! and record any rejection for the catchers in `responses.rs`.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use regex::RegexSet;
use rocket::Request;
use rocket::State;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{
    Object, SecurityRequirement, SecurityScheme, SecuritySchemeData,
};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use uuid::Uuid;

use crate::auth::context::{AdminContext, UserContext};
use crate::auth::extract::{TokenScope, extract_token};
use crate::auth::store::{self, AdminAccount, CredentialStore, LookupError, UserAccount};
use crate::auth::{AuthConfig, AuthError, AuthResult, AuthState, TokenSigner};

/// Result of a gate that did not reject the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access<C> {
    /// Path is on the allowlist; no principal was looked for.
    Public,
    Granted(C),
}

impl<C> Access<C> {
    pub fn granted(&self) -> Option<&C> {
        match self {
            Access::Public => None,
            Access::Granted(context) => Some(context),
        }
    }

    pub fn into_granted(self) -> Option<C> {
        match self {
            Access::Public => None,
            Access::Granted(context) => Some(context),
        }
    }
}

/// How a rejection is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMode {
    Json,
    /// 302 to `location` for authentication failures. Other failures still
    /// get a JSON body.
    Redirect { location: String },
}

#[derive(Debug, Clone)]
pub struct PublicPaths(RegexSet);

impl PublicPaths {
    pub fn new<I, S>(patterns: I) -> AuthResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        RegexSet::new(patterns)
            .map(Self)
            .map_err(|err| AuthError::Config(format!("invalid public path pattern: {err}")))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.0.is_match(path)
    }
}

/// True for `.../admin/login` and `.../admin/verify/<id>`, the two admin
/// paths reachable without a session.
pub fn is_admin_public_path(path: &str) -> bool {
    let segments: Vec<&str> = path.trim_end_matches('/').rsplit('/').take(3).collect();
    matches!(
        segments.as_slice(),
        ["login", "admin", ..] | [_, "verify", "admin"]
    )
}

fn parse_uid(raw: &str) -> AuthResult<Uuid> {
    if raw.is_empty() {
        log::debug!("token carries no uid");
        return Err(AuthError::InvalidToken);
    }
    Uuid::parse_str(raw).map_err(|_| {
        log::debug!("token uid is not a uuid");
        AuthError::InvalidToken
    })
}

/// User-level gate: any valid token with a `uid`.
pub struct AuthGuard {
    signer: Arc<TokenSigner>,
    public_paths: PublicPaths,
    mode: ResponseMode,
}

impl AuthGuard {
    pub fn new(signer: Arc<TokenSigner>, public_paths: PublicPaths, mode: ResponseMode) -> Self {
        Self {
            signer,
            public_paths,
            mode,
        }
    }

    pub fn mode(&self) -> &ResponseMode {
        &self.mode
    }

    pub fn check(&self, path: &str, token: &str) -> AuthResult<Access<UserContext>> {
        if self.public_paths.matches(path) {
            return Ok(Access::Public);
        }
        if token.is_empty() {
            log::debug!("no token presented for {path}");
            return Err(AuthError::MissingToken);
        }

        let claims = self.signer.verify(token)?;
        let uid = parse_uid(&claims.uid)?;
        Ok(Access::Granted(UserContext::new(uid)))
    }
}

/// Admin gate returned on success: the injected context plus the account
/// as loaded during this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAdmin {
    pub context: AdminContext,
    pub account: AdminAccount,
}

/// Privileged gate: a valid token whose `uid` names an existing admin.
pub struct AdminGuard {
    signer: Arc<TokenSigner>,
    store: Option<Arc<dyn CredentialStore>>,
    lookup_timeout: Duration,
    mode: ResponseMode,
}

impl AdminGuard {
    pub fn new(
        signer: Arc<TokenSigner>,
        store: Option<Arc<dyn CredentialStore>>,
        lookup_timeout: Duration,
        mode: ResponseMode,
    ) -> Self {
        Self {
            signer,
            store,
            lookup_timeout,
            mode,
        }
    }

    pub fn mode(&self) -> &ResponseMode {
        &self.mode
    }

    pub async fn check(&self, path: &str, token: &str) -> AuthResult<Access<VerifiedAdmin>> {
        if is_admin_public_path(path) {
            return Ok(Access::Public);
        }
        if token.is_empty() {
            log::debug!("no admin token presented for {path}");
            return Err(AuthError::MissingToken);
        }

        let claims = self.signer.verify(token)?;
        let admin_id = parse_uid(&claims.uid)?;

        let Some(store) = self.store.as_ref() else {
            log::error!("admin check for {path} with no credential store configured");
            return Err(AuthError::DependencyUnavailable(
                "credential store not configured".into(),
            ));
        };

        let account = resolve_principal(
            self.lookup_timeout,
            store.admin_by_id(admin_id),
            "admin",
            admin_id,
        )
        .await?;

        Ok(Access::Granted(VerifiedAdmin {
            context: AdminContext::verified(account.id),
            account,
        }))
    }
}

/// Map a principal lookup onto the guard error classes.
async fn resolve_principal<T>(
    deadline: Duration,
    lookup: impl Future<Output = store::LookupResult<T>>,
    kind: &str,
    id: Uuid,
) -> AuthResult<T> {
    match store::within(deadline, lookup).await {
        Ok(found) => Ok(found),
        Err(LookupError::NotFound) => {
            log::warn!("token for unknown {kind} {id}");
            Err(AuthError::PrincipalNotFound)
        }
        Err(LookupError::DeadlineExceeded) => {
            log::warn!("{kind} lookup for {id} exceeded {deadline:?}");
            Err(AuthError::Timeout)
        }
        Err(err) => {
            log::error!("{kind} lookup for {id} failed: {err}");
            Err(AuthError::DependencyUnavailable(err.to_string()))
        }
    }
}

/// One guard instance per response mode, built once at startup.
pub struct GuardSet {
    pub user_api: AuthGuard,
    pub user_views: AuthGuard,
    pub admin_api: AdminGuard,
    pub admin_views: AdminGuard,
}

impl GuardSet {
    pub fn new(
        config: &AuthConfig,
        signer: Arc<TokenSigner>,
        store: Option<Arc<dyn CredentialStore>>,
    ) -> AuthResult<Self> {
        let public_paths = PublicPaths::new(&config.public_paths)?;
        let login = ResponseMode::Redirect {
            location: config.login_page.clone(),
        };
        let admin_login = ResponseMode::Redirect {
            location: config.admin_login_page.clone(),
        };

        Ok(Self {
            user_api: AuthGuard::new(signer.clone(), public_paths.clone(), ResponseMode::Json),
            user_views: AuthGuard::new(signer.clone(), public_paths, login),
            admin_api: AdminGuard::new(
                signer.clone(),
                store.clone(),
                config.lookup_timeout,
                ResponseMode::Json,
            ),
            admin_views: AdminGuard::new(signer, store, config.lookup_timeout, admin_login),
        })
    }
}

// ===== Rocket integration =====

/// Selects which guard instance a route group uses.
pub trait GuardProfile: Send + Sync + 'static {
    fn user_guard(guards: &GuardSet) -> &AuthGuard;
    fn admin_guard(guards: &GuardSet) -> &AdminGuard;
}

/// JSON routes under `/api`.
pub struct Api;

/// Browser routes; authentication failures redirect to a login page.
pub struct Views;

impl GuardProfile for Api {
    fn user_guard(guards: &GuardSet) -> &AuthGuard {
        &guards.user_api
    }

    fn admin_guard(guards: &GuardSet) -> &AdminGuard {
        &guards.admin_api
    }
}

impl GuardProfile for Views {
    fn user_guard(guards: &GuardSet) -> &AuthGuard {
        &guards.user_views
    }

    fn admin_guard(guards: &GuardSet) -> &AdminGuard {
        &guards.admin_views
    }
}

/// A gate failure, kept on the request for the catcher that renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub mode: ResponseMode,
    pub error: AuthError,
}

#[derive(Debug, Clone, Default)]
pub struct LastRejection(pub Option<Rejection>);

pub fn last_rejection(request: &Request<'_>) -> Option<Rejection> {
    request.local_cache(|| LastRejection(None)).0.clone()
}

pub fn user_context(request: &Request<'_>) -> Option<UserContext> {
    *request.local_cache(|| None::<UserContext>)
}

pub fn admin_context(request: &Request<'_>) -> Option<AdminContext> {
    *request.local_cache(|| None::<AdminContext>)
}

fn reject<T>(request: &Request<'_>, mode: &ResponseMode, error: AuthError) -> Outcome<T, AuthError> {
    request.local_cache(|| {
        LastRejection(Some(Rejection {
            mode: mode.clone(),
            error: error.clone(),
        }))
    });
    Outcome::Error((error.status(), error))
}

async fn auth_state<'r>(request: &'r Request<'_>) -> AuthResult<&'r AuthState> {
    request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .map(|state| state.inner())
        .ok_or_else(|| AuthError::Config("AuthState missing from managed state".into()))
}

/// Gate for user-level route groups.
///
/// Passes public paths without a principal; everywhere else it requires a
/// valid token and makes a [`UserContext`] available.
pub struct UserGate<M: GuardProfile> {
    access: Access<UserContext>,
    _mode: PhantomData<M>,
}

impl<M: GuardProfile> UserGate<M> {
    pub fn context(&self) -> Option<UserContext> {
        self.access.granted().copied()
    }

    pub fn is_public(&self) -> bool {
        matches!(self.access, Access::Public)
    }
}

#[rocket::async_trait]
impl<'r, M: GuardProfile> FromRequest<'r> for UserGate<M> {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let state = match auth_state(request).await {
            Ok(state) => state,
            Err(err) => return reject(request, &ResponseMode::Json, err),
        };
        let guard = M::user_guard(&state.guards);
        let token = extract_token(request, &state.config, TokenScope::User);

        match guard.check(request.uri().path().as_str(), &token) {
            Ok(access) => {
                if let Access::Granted(context) = &access {
                    request.local_cache(|| Some(*context));
                }
                Outcome::Success(UserGate {
                    access,
                    _mode: PhantomData,
                })
            }
            Err(err) => reject(request, guard.mode(), err),
        }
    }
}

/// The signed-in user, resolved from the store on every request.
pub struct AuthUser<M: GuardProfile> {
    pub user: UserAccount,
    _mode: PhantomData<M>,
}

#[rocket::async_trait]
impl<'r, M: GuardProfile> FromRequest<'r> for AuthUser<M> {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let gate = rocket::outcome::try_outcome!(UserGate::<M>::from_request(request).await);
        let state = match auth_state(request).await {
            Ok(state) => state,
            Err(err) => return reject(request, &ResponseMode::Json, err),
        };
        let mode = M::user_guard(&state.guards).mode();

        let Some(context) = gate.context() else {
            return reject(request, mode, AuthError::MissingToken);
        };
        let Some(store) = state.store.as_ref() else {
            log::error!("user lookup with no credential store configured");
            return reject(
                request,
                mode,
                AuthError::DependencyUnavailable("credential store not configured".into()),
            );
        };

        let lookup = store.user_by_id(context.uid());
        match resolve_principal(state.config.lookup_timeout, lookup, "user", context.uid()).await
        {
            Ok(user) => Outcome::Success(AuthUser {
                user,
                _mode: PhantomData,
            }),
            Err(err) => reject(request, mode, err),
        }
    }
}

/// Gate for admin route groups. The admin login path passes through.
pub struct AdminGate<M: GuardProfile> {
    access: Access<VerifiedAdmin>,
    _mode: PhantomData<M>,
}

impl<M: GuardProfile> AdminGate<M> {
    pub fn is_public(&self) -> bool {
        matches!(self.access, Access::Public)
    }
}

#[rocket::async_trait]
impl<'r, M: GuardProfile> FromRequest<'r> for AdminGate<M> {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let state = match auth_state(request).await {
            Ok(state) => state,
            Err(err) => return reject(request, &ResponseMode::Json, err),
        };
        let guard = M::admin_guard(&state.guards);
        let token = extract_token(request, &state.config, TokenScope::Admin);

        match guard.check(request.uri().path().as_str(), &token).await {
            Ok(access) => {
                if let Access::Granted(verified) = &access {
                    let context = verified.context;
                    request.local_cache(|| Some(context));
                }
                Outcome::Success(AdminGate {
                    access,
                    _mode: PhantomData,
                })
            }
            Err(err) => reject(request, guard.mode(), err),
        }
    }
}

/// A verified admin. Never satisfied by the public login path.
pub struct RequireAdmin<M: GuardProfile> {
    pub context: AdminContext,
    pub account: AdminAccount,
    _mode: PhantomData<M>,
}

#[rocket::async_trait]
impl<'r, M: GuardProfile> FromRequest<'r> for RequireAdmin<M> {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let gate = rocket::outcome::try_outcome!(AdminGate::<M>::from_request(request).await);
        match gate.access.into_granted() {
            Some(VerifiedAdmin { context, account }) => Outcome::Success(RequireAdmin {
                context,
                account,
                _mode: PhantomData,
            }),
            None => {
                let mode = match auth_state(request).await {
                    Ok(state) => M::admin_guard(&state.guards).mode().clone(),
                    Err(_) => ResponseMode::Json,
                };
                reject(request, &mode, AuthError::MissingToken)
            }
        }
    }
}

// ===== OpenAPI =====

const SECURITY_SCHEME_NAME: &str = "BearerAuth";

fn bearer_security() -> RequestHeaderInput {
    let scheme = SecurityScheme {
        description: Some(
            "Session token from the login endpoints, sent as a cookie or bearer header.".into(),
        ),
        data: SecuritySchemeData::Http {
            scheme: "bearer".into(),
            bearer_format: Some("JWT".into()),
        },
        extensions: Object::default(),
    };
    let mut requirement = SecurityRequirement::new();
    requirement.insert(SECURITY_SCHEME_NAME.into(), Vec::new());
    RequestHeaderInput::Security(SECURITY_SCHEME_NAME.into(), scheme, requirement)
}

macro_rules! bearer_openapi {
    ($($guard:ident),+ $(,)?) => {
        $(
            impl<'r, M: GuardProfile> OpenApiFromRequest<'r> for $guard<M> {
                fn from_request_input(
                    _gen: &mut OpenApiGenerator,
                    _name: String,
                    _required: bool,
                ) -> rocket_okapi::Result<RequestHeaderInput> {
                    Ok(bearer_security())
                }
            }
        )+
    };
}

bearer_openapi!(UserGate, AuthUser, AdminGate, RequireAdmin);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::context::PrincipalKind;
    use crate::auth::permissions::{PermissionSet, Role};
    use crate::auth::store::NewAdmin;
    use crate::test_support::InMemoryCredentialStore;

    const SECRET: &[u8] = b"guard-test-secret";

    fn signer() -> Arc<TokenSigner> {
        Arc::new(TokenSigner::new(SECRET, "everato", Duration::from_secs(600)))
    }

    fn user_guard() -> AuthGuard {
        let config = AuthConfig::with_secret("unused");
        AuthGuard::new(
            signer(),
            PublicPaths::new(&config.public_paths).expect("patterns"),
            ResponseMode::Json,
        )
    }

    fn admin_guard(store: Option<Arc<dyn CredentialStore>>) -> AdminGuard {
        AdminGuard::new(signer(), store, Duration::from_millis(200), ResponseMode::Json)
    }

    async fn seeded_store() -> (Arc<InMemoryCredentialStore>, AdminAccount) {
        let store = Arc::new(InMemoryCredentialStore::new());
        let admin = store
            .insert_admin(NewAdmin {
                email: "root@everato.test".into(),
                username: "root".into(),
                name: "Root".into(),
                password_hash: "unused".into(),
                role: Role::SuperAdmin,
                permissions: PermissionSet::all(),
            })
            .await
            .expect("seed admin");
        (store, admin)
    }

    #[test]
    fn public_paths_pass_without_token() {
        let guard = user_guard();
        for path in [
            "/auth/login",
            "/auth/register",
            "/api/v1/auth/login",
            "/api/v2/auth/register",
            "/api/v1/auth/verify-email",
        ] {
            assert_eq!(guard.check(path, ""), Ok(Access::Public), "{path}");
        }
    }

    #[test]
    fn every_other_path_needs_a_token() {
        let guard = user_guard();
        for path in [
            "/",
            "/auth/logout",
            "/auth/login/extra",
            "/api/v1/auth/me",
            "/dashboard",
            "/xauth/login",
        ] {
            assert_eq!(guard.check(path, ""), Err(AuthError::MissingToken), "{path}");
        }
    }

    #[test]
    fn user_guard_requires_a_uuid_uid() {
        let guard = user_guard();
        let signer = signer();
        let uid = Uuid::new_v4();

        let issued = signer.issue(uid, PrincipalKind::User).expect("issue");
        assert_eq!(
            guard.check("/api/v1/auth/me", &issued.token),
            Ok(Access::Granted(UserContext::new(uid)))
        );

        let mut claims = signer.verify(&issued.token).expect("claims");
        claims.uid = "not-a-uuid".into();
        let token = signer.sign(&claims).expect("sign");
        assert_eq!(
            guard.check("/api/v1/auth/me", &token),
            Err(AuthError::InvalidToken)
        );

        claims.uid.clear();
        let token = signer.sign(&claims).expect("sign");
        assert_eq!(
            guard.check("/api/v1/auth/me", &token),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn admin_public_path_detection() {
        assert!(is_admin_public_path("/admin/login"));
        assert!(is_admin_public_path("/api/v1/admin/login"));
        assert!(is_admin_public_path("/api/v1/admin/login/"));
        assert!(is_admin_public_path("/api/v1/admin/verify/0b7e8f1e"));
        assert!(!is_admin_public_path("/api/v1/admin/verify"));
        assert!(!is_admin_public_path("/api/v1/admin/send-verification/0b7e8f1e"));
        assert!(!is_admin_public_path("/admin/logout"));
        assert!(!is_admin_public_path("/login"));
        assert!(!is_admin_public_path("/superadmin/login"));
    }

    #[tokio::test]
    async fn admin_guard_fails_closed_without_store() {
        let guard = admin_guard(None);
        let token = signer()
            .issue(Uuid::new_v4(), PrincipalKind::Admin)
            .expect("issue")
            .token;

        assert!(matches!(
            guard.check("/api/v1/admin/all", &token).await,
            Err(AuthError::DependencyUnavailable(_))
        ));
        assert_eq!(
            guard.check("/api/v1/admin/login", "").await,
            Ok(Access::Public)
        );
    }

    #[tokio::test]
    async fn admin_guard_resolves_existing_admins_only() {
        let (store, admin) = seeded_store().await;
        let guard = admin_guard(Some(store.clone() as Arc<dyn CredentialStore>));
        let signer = signer();

        let token = signer.issue(admin.id, PrincipalKind::Admin).expect("issue").token;
        let access = guard.check("/api/v1/admin/all", &token).await.expect("granted");
        let verified = access.into_granted().expect("principal");
        assert_eq!(verified.context.admin_id(), admin.id);
        assert!(verified.context.is_admin());

        let stranger = signer
            .issue(Uuid::new_v4(), PrincipalKind::Admin)
            .expect("issue")
            .token;
        assert_eq!(
            guard.check("/api/v1/admin/all", &stranger).await,
            Err(AuthError::PrincipalNotFound)
        );
    }

    #[tokio::test]
    async fn store_faults_and_slowness_are_distinct() {
        let (store, admin) = seeded_store().await;
        let guard = admin_guard(Some(store.clone() as Arc<dyn CredentialStore>));
        let token = signer()
            .issue(admin.id, PrincipalKind::Admin)
            .expect("issue")
            .token;

        store.set_unavailable(true);
        assert!(matches!(
            guard.check("/api/v1/admin/all", &token).await,
            Err(AuthError::DependencyUnavailable(_))
        ));

        store.set_unavailable(false);
        store.set_delay(Some(Duration::from_secs(2)));
        assert_eq!(
            guard.check("/api/v1/admin/all", &token).await,
            Err(AuthError::Timeout)
        );
    }
}
