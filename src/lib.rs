#[macro_use]
extern crate rocket;

pub mod auth;
pub mod bootstrap;
pub mod db;
pub mod error;
pub mod mailer;
pub mod request_logger;
pub mod routes;

use crate::auth::store::CredentialStore;
use crate::auth::{AuthConfig, AuthState, PasswordService, PgCredentialStore};
use crate::db::EveratoDb;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// JSON API routes, mounted under `/api/v1`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health
        routes::health::health_check,
        // User sessions
        routes::auth::register,
        routes::auth::login,
        routes::auth::logout,
        routes::auth::me,
        routes::auth::verify_email,
        // Admin sessions and accounts
        routes::admin::login,
        routes::admin::logout,
        routes::admin::roles,
        routes::admin::permissions,
        routes::admin::list_admins,
        routes::admin::get_admin,
        routes::admin::get_admin_by_username,
        routes::admin::search_admins,
        routes::admin::create_admin,
        routes::admin::update_admin,
        routes::admin::delete_admin,
        routes::admin::send_verification,
        routes::admin::verify_admin,
    ]
}

/// Browser pages, mounted at the root.
pub fn view_routes() -> Vec<Route> {
    routes![
        routes::views::user_login_page,
        routes::views::admin_login_page,
        routes::views::dashboard,
        routes::views::admin_dashboard,
    ]
}

pub fn rocket() -> Rocket<Build> {
    init_logger();
    log::info!("Starting Everato API Server");

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(EveratoDb::init())
        .attach(cors)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match EveratoDb::fetch(&rocket) {
                Some(db) => match db::run_migrations(db).await {
                    Ok(_) => {
                        log::info!("database migrations successful");
                        Ok(rocket)
                    }
                    Err(e) => {
                        log::error!("database migrations failed: {}", e);
                        Err(rocket)
                    }
                },
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        // Build the auth state over the pool and provision configured super users
        .attach(AdHoc::try_on_ignite("Auth State", |rocket| async move {
            let config = match AuthConfig::from_env() {
                Ok(config) => config,
                Err(err) => {
                    log::error!("auth configuration invalid: {}", err);
                    return Err(rocket);
                }
            };
            let passwords = match PasswordService::new() {
                Ok(passwords) => passwords,
                Err(err) => {
                    log::error!("failed to initialise password hashing: {}", err);
                    return Err(rocket);
                }
            };
            let Some(db) = EveratoDb::fetch(&rocket) else {
                log::error!("database pool not available for credential store");
                return Err(rocket);
            };
            let store: Arc<dyn CredentialStore> =
                Arc::new(PgCredentialStore::new((**db).clone()));

            let seeds = match bootstrap::seeds_from_figment(rocket.figment()) {
                Ok(seeds) => seeds,
                Err(err) => {
                    log::error!("{}", err);
                    return Err(rocket);
                }
            };
            match bootstrap::ensure_super_users(store.as_ref(), &passwords, &seeds).await {
                Ok(report) => log::info!(
                    "super users: {} created, {} already present",
                    report.created.len(),
                    report.skipped.len()
                ),
                Err(err) => {
                    log::error!("super user provisioning failed: {}", err);
                    return Err(rocket);
                }
            }

            match AuthState::new(config, passwords, Some(store)) {
                Ok(state) => {
                    log::info!("auth state ready (issuer '{}')", state.config.issuer);
                    Ok(rocket.manage(state))
                }
                Err(err) => {
                    log::error!("failed to build auth state: {}", err);
                    Err(rocket)
                }
            }
        }))
        .mount("/api/v1", api_routes())
        .mount("/", view_routes())
        .register("/", auth::responses::catchers())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Everato API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use parking_lot::{Mutex, RwLock};
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use uuid::Uuid;

    use crate::auth::permissions::{PermissionSet, Role};
    use crate::auth::store::{
        AdminAccount, AdminChanges, CredentialStore, LookupError, LookupResult, NewAdmin,
        NewUser, UserAccount,
    };
    use crate::auth::{AuthConfig, AuthState, PasswordService};

    pub use database::{TestDatabase, TestDatabaseError};

    pub const TEST_JWT_SECRET: &str = "everato-test-secret";

    /// Credential store kept in memory, with switches to simulate an
    /// unreachable or slow database.
    #[derive(Default)]
    pub struct InMemoryCredentialStore {
        admins: RwLock<Vec<AdminAccount>>,
        users: RwLock<Vec<UserAccount>>,
        unavailable: AtomicBool,
        delay: Mutex<Option<Duration>>,
    }

    impl InMemoryCredentialStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every call fail with a database error.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Sleep this long before answering each call.
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock() = delay;
        }

        pub fn admin_count(&self) -> usize {
            self.admins.read().len()
        }

        /// Insert an admin directly, bypassing uniqueness checks.
        pub fn seed_admin(
            &self,
            username: &str,
            role: Role,
            permissions: PermissionSet,
            password_hash: &str,
        ) -> AdminAccount {
            let admin = AdminAccount {
                id: Uuid::new_v4(),
                email: format!("{username}@everato.test"),
                username: username.to_string(),
                name: username.to_string(),
                password_hash: password_hash.to_string(),
                role,
                permissions,
                verified: true,
                created_at: Utc::now(),
            };
            self.admins.write().push(admin.clone());
            admin
        }

        pub fn seed_user(&self, email: &str, password_hash: &str) -> UserAccount {
            let user = UserAccount {
                id: Uuid::new_v4(),
                email: email.to_string(),
                first_name: "Test".into(),
                last_name: "User".into(),
                password_hash: password_hash.to_string(),
                verified: true,
                created_at: Utc::now(),
            };
            self.users.write().push(user.clone());
            user
        }

        async fn gate(&self) -> LookupResult<()> {
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(LookupError::Database("connection refused".into()));
            }
            Ok(())
        }
    }

    #[rocket::async_trait]
    impl CredentialStore for InMemoryCredentialStore {
        async fn admin_by_id(&self, id: Uuid) -> LookupResult<AdminAccount> {
            self.gate().await?;
            self.admins
                .read()
                .iter()
                .find(|admin| admin.id == id)
                .cloned()
                .ok_or(LookupError::NotFound)
        }

        async fn admin_by_login(&self, login: &str) -> LookupResult<AdminAccount> {
            self.gate().await?;
            self.admins
                .read()
                .iter()
                .find(|admin| admin.email == login || admin.username == login)
                .cloned()
                .ok_or(LookupError::NotFound)
        }

        async fn admin_by_username(&self, username: &str) -> LookupResult<AdminAccount> {
            self.gate().await?;
            self.admins
                .read()
                .iter()
                .find(|admin| admin.username == username)
                .cloned()
                .ok_or(LookupError::NotFound)
        }

        async fn list_admins(&self) -> LookupResult<Vec<AdminAccount>> {
            self.gate().await?;
            Ok(self.admins.read().clone())
        }

        async fn search_admins(&self, query: &str) -> LookupResult<Vec<AdminAccount>> {
            self.gate().await?;
            let email = query.to_lowercase();
            Ok(self
                .admins
                .read()
                .iter()
                .filter(|admin| admin.email == email || admin.username == query)
                .cloned()
                .collect())
        }

        async fn insert_admin(&self, admin: NewAdmin) -> LookupResult<AdminAccount> {
            self.gate().await?;
            let mut admins = self.admins.write();
            if admins
                .iter()
                .any(|existing| existing.email == admin.email || existing.username == admin.username)
            {
                return Err(LookupError::Conflict("admins_email_key".into()));
            }
            let account = AdminAccount {
                id: Uuid::new_v4(),
                email: admin.email,
                username: admin.username,
                name: admin.name,
                password_hash: admin.password_hash,
                role: admin.role,
                permissions: admin.permissions,
                verified: false,
                created_at: Utc::now(),
            };
            admins.push(account.clone());
            Ok(account)
        }

        async fn update_admin(
            &self,
            id: Uuid,
            changes: AdminChanges,
        ) -> LookupResult<AdminAccount> {
            self.gate().await?;
            let mut admins = self.admins.write();
            let clash = admins.iter().any(|other| {
                other.id != id
                    && (changes.email.as_ref() == Some(&other.email)
                        || changes.username.as_ref() == Some(&other.username))
            });
            if clash {
                return Err(LookupError::Conflict("admins_email_key".into()));
            }
            let admin = admins
                .iter_mut()
                .find(|admin| admin.id == id)
                .ok_or(LookupError::NotFound)?;
            if let Some(email) = changes.email {
                admin.email = email;
            }
            if let Some(username) = changes.username {
                admin.username = username;
            }
            if let Some(name) = changes.name {
                admin.name = name;
            }
            if let Some(hash) = changes.password_hash {
                admin.password_hash = hash;
            }
            if let Some(role) = changes.role {
                admin.role = role;
            }
            if let Some(permissions) = changes.permissions {
                admin.permissions = permissions;
            }
            Ok(admin.clone())
        }

        async fn delete_admin(&self, id: Uuid) -> LookupResult<()> {
            self.gate().await?;
            let mut admins = self.admins.write();
            let before = admins.len();
            admins.retain(|admin| admin.id != id);
            if admins.len() == before {
                return Err(LookupError::NotFound);
            }
            Ok(())
        }

        async fn verify_admin(&self, id: Uuid) -> LookupResult<AdminAccount> {
            self.gate().await?;
            let mut admins = self.admins.write();
            let admin = admins
                .iter_mut()
                .find(|admin| admin.id == id)
                .ok_or(LookupError::NotFound)?;
            admin.verified = true;
            Ok(admin.clone())
        }

        async fn user_by_id(&self, id: Uuid) -> LookupResult<UserAccount> {
            self.gate().await?;
            self.users
                .read()
                .iter()
                .find(|user| user.id == id)
                .cloned()
                .ok_or(LookupError::NotFound)
        }

        async fn user_by_email(&self, email: &str) -> LookupResult<UserAccount> {
            self.gate().await?;
            self.users
                .read()
                .iter()
                .find(|user| user.email == email)
                .cloned()
                .ok_or(LookupError::NotFound)
        }

        async fn insert_user(&self, user: NewUser) -> LookupResult<UserAccount> {
            self.gate().await?;
            let mut users = self.users.write();
            if users.iter().any(|existing| existing.email == user.email) {
                return Err(LookupError::Conflict("users_email_key".into()));
            }
            let account = UserAccount {
                id: Uuid::new_v4(),
                email: user.email,
                first_name: user.first_name,
                last_name: user.last_name,
                password_hash: user.password_hash,
                verified: false,
                created_at: Utc::now(),
            };
            users.push(account.clone());
            Ok(account)
        }

        async fn verify_user(&self, id: Uuid) -> LookupResult<UserAccount> {
            self.gate().await?;
            let mut users = self.users.write();
            let user = users
                .iter_mut()
                .find(|user| user.id == id)
                .ok_or(LookupError::NotFound)?;
            user.verified = true;
            Ok(user.clone())
        }
    }

    /// Auth configuration for tests: fixed secret, short store deadline.
    pub fn test_auth_config() -> AuthConfig {
        let mut config = AuthConfig::with_secret(TEST_JWT_SECRET);
        config.lookup_timeout = Duration::from_millis(500);
        config
    }

    pub fn test_auth_state(store: Option<Arc<dyn CredentialStore>>) -> AuthState {
        let passwords = PasswordService::new().expect("password service");
        AuthState::new(test_auth_config(), passwords, store).expect("auth state")
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        use crate::db::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        ///
        /// Uses `TEST_DATABASE_URL` when set, otherwise starts a disposable
        /// Postgres container if `EVERATO_TESTCONTAINERS` is set. With neither,
        /// [`TestDatabaseError::MissingUrl`] tells the caller to skip.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
                    return Self::create(&url, None).await;
                }
                if std::env::var_os("EVERATO_TESTCONTAINERS").is_some() {
                    return Self::new_container().await;
                }
                Err(TestDatabaseError::MissingUrl)
            }

            /// Provision a fresh database inside a disposable Postgres container.
            pub async fn new_container() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine")
                    .with_wait_for(WaitFor::message_on_stdout(
                        "database system is ready to accept connections",
                    ))
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ));

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::create(&url, Some(container)).await
            }

            async fn create(
                url: &str,
                container: Option<ContainerAsync<GenericImage>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database_with_fallback(admin_options, &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ =
                                        drop_database_with_fallback(admin_options, &db_name).await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    ///
    /// Catchers are always registered so gate failures render exactly as in
    /// production.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        auth_state: Option<AuthState>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                auth_state: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Mount routes at the root, where the browser pages live.
        pub fn mount_view_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/".to_string(), routes));
            self
        }

        pub fn manage_auth_state(mut self, state: AuthState) -> Self {
            self.auth_state = Some(state);
            self
        }

        /// Manage an auth state over `store`, or over no store at all.
        pub fn with_store(self, store: Option<Arc<dyn CredentialStore>>) -> Self {
            self.manage_auth_state(test_auth_state(store))
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket =
                rocket::custom(self.figment).register("/", crate::auth::responses::catchers());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(state) = self.auth_state {
                rocket = rocket.manage(state);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
