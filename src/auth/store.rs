//! Credential store seam and its PostgreSQL implementation.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::permissions::{Actor, Permission, PermissionSet, Role, Target};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("record not found")]
    NotFound,
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("lookup exceeded the request deadline")]
    DeadlineExceeded,
}

impl From<sqlx::Error> for LookupError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => LookupError::NotFound,
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                LookupError::Conflict(db_err.message().to_string())
            }
            other => LookupError::Database(other.to_string()),
        }
    }
}

pub type LookupResult<T> = Result<T, LookupError>;

/// Run a store call under `deadline`. The call is dropped, and so cancelled,
/// when the deadline passes.
pub async fn within<T, F>(deadline: Duration, lookup: F) -> LookupResult<T>
where
    F: Future<Output = LookupResult<T>>,
{
    match tokio::time::timeout(deadline, lookup).await {
        Ok(result) => result,
        Err(_) => Err(LookupError::DeadlineExceeded),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub permissions: PermissionSet,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl AdminAccount {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            role: self.role,
            permissions: self.permissions.clone(),
        }
    }

    pub fn target(&self) -> Target {
        Target {
            id: self.id,
            role: self.role,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub email: String,
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub permissions: PermissionSet,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct AdminChanges {
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub permissions: Option<PermissionSet>,
}

impl AdminChanges {
    pub fn touches_grants(&self) -> bool {
        self.role.is_some() || self.permissions.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
}

/// Storage for admin and user credentials.
///
/// `NotFound` must only be returned when the record is known to be absent;
/// connectivity problems are `Database`, which the guards turn into a 503
/// rather than an authentication failure.
#[rocket::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn admin_by_id(&self, id: Uuid) -> LookupResult<AdminAccount>;

    /// Look up by email or username.
    async fn admin_by_login(&self, login: &str) -> LookupResult<AdminAccount>;

    async fn admin_by_username(&self, username: &str) -> LookupResult<AdminAccount>;

    async fn list_admins(&self) -> LookupResult<Vec<AdminAccount>>;

    /// Admins whose email or username equals `query` exactly. Each admin
    /// appears at most once.
    async fn search_admins(&self, query: &str) -> LookupResult<Vec<AdminAccount>>;

    async fn insert_admin(&self, admin: NewAdmin) -> LookupResult<AdminAccount>;

    async fn update_admin(&self, id: Uuid, changes: AdminChanges) -> LookupResult<AdminAccount>;

    async fn delete_admin(&self, id: Uuid) -> LookupResult<()>;

    /// Mark the admin's email as confirmed.
    async fn verify_admin(&self, id: Uuid) -> LookupResult<AdminAccount>;

    async fn user_by_id(&self, id: Uuid) -> LookupResult<UserAccount>;

    async fn user_by_email(&self, email: &str) -> LookupResult<UserAccount>;

    async fn insert_user(&self, user: NewUser) -> LookupResult<UserAccount>;

    async fn verify_user(&self, id: Uuid) -> LookupResult<UserAccount>;
}

#[derive(Debug, FromRow)]
struct AdminRow {
    id: Uuid,
    email: String,
    username: String,
    name: String,
    password_hash: String,
    role: String,
    permissions: Vec<String>,
    verified: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AdminRow> for AdminAccount {
    type Error = LookupError;

    fn try_from(row: AdminRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|err| LookupError::Database(err.to_string()))?;
        let permissions = row
            .permissions
            .iter()
            .map(|name| name.parse::<Permission>())
            .collect::<Result<PermissionSet, _>>()
            .map_err(|err| LookupError::Database(err.to_string()))?;

        Ok(AdminAccount {
            id: row.id,
            email: row.email,
            username: row.username,
            name: row.name,
            password_hash: row.password_hash,
            role,
            permissions,
            verified: row.verified,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    password_hash: String,
    verified: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            password_hash: row.password_hash,
            verified: row.verified,
            created_at: row.created_at,
        }
    }
}

const ADMIN_COLUMNS: &str =
    "id, email, username, name, password_hash, role, permissions, verified, created_at";
const USER_COLUMNS: &str = "id, email, first_name, last_name, password_hash, verified, created_at";

#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl CredentialStore for PgCredentialStore {
    async fn admin_by_id(&self, id: Uuid) -> LookupResult<AdminAccount> {
        let row = sqlx::query_as::<_, AdminRow>(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admins WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        AdminAccount::try_from(row)
    }

    async fn admin_by_login(&self, login: &str) -> LookupResult<AdminAccount> {
        let row = sqlx::query_as::<_, AdminRow>(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admins WHERE email = $1 OR username = $1 LIMIT 1"
        ))
        .bind(login)
        .fetch_one(&self.pool)
        .await?;
        AdminAccount::try_from(row)
    }

    async fn admin_by_username(&self, username: &str) -> LookupResult<AdminAccount> {
        let row = sqlx::query_as::<_, AdminRow>(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admins WHERE username = $1"
        ))
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        AdminAccount::try_from(row)
    }

    async fn list_admins(&self) -> LookupResult<Vec<AdminAccount>> {
        let rows = sqlx::query_as::<_, AdminRow>(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admins ORDER BY created_at, email"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AdminAccount::try_from).collect()
    }

    async fn search_admins(&self, query: &str) -> LookupResult<Vec<AdminAccount>> {
        let rows = sqlx::query_as::<_, AdminRow>(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admins WHERE email = $1 OR username = $2 \
             ORDER BY created_at, email"
        ))
        .bind(query.to_lowercase())
        .bind(query)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AdminAccount::try_from).collect()
    }

    async fn insert_admin(&self, admin: NewAdmin) -> LookupResult<AdminAccount> {
        let row = sqlx::query_as::<_, AdminRow>(&format!(
            "INSERT INTO admins (id, email, username, name, password_hash, role, permissions) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {ADMIN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&admin.email)
        .bind(&admin.username)
        .bind(&admin.name)
        .bind(&admin.password_hash)
        .bind(admin.role.as_str())
        .bind(admin.permissions.as_strings())
        .fetch_one(&self.pool)
        .await?;
        AdminAccount::try_from(row)
    }

    async fn update_admin(&self, id: Uuid, changes: AdminChanges) -> LookupResult<AdminAccount> {
        let row = sqlx::query_as::<_, AdminRow>(&format!(
            "UPDATE admins SET \
                email = COALESCE($2, email), \
                username = COALESCE($3, username), \
                name = COALESCE($4, name), \
                password_hash = COALESCE($5, password_hash), \
                role = COALESCE($6, role), \
                permissions = COALESCE($7, permissions) \
             WHERE id = $1 RETURNING {ADMIN_COLUMNS}"
        ))
        .bind(id)
        .bind(changes.email)
        .bind(changes.username)
        .bind(changes.name)
        .bind(changes.password_hash)
        .bind(changes.role.map(|role| role.as_str()))
        .bind(changes.permissions.map(|set| set.as_strings()))
        .fetch_one(&self.pool)
        .await?;
        AdminAccount::try_from(row)
    }

    async fn delete_admin(&self, id: Uuid) -> LookupResult<()> {
        let result = sqlx::query("DELETE FROM admins WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LookupError::NotFound);
        }
        Ok(())
    }

    async fn verify_admin(&self, id: Uuid) -> LookupResult<AdminAccount> {
        let row = sqlx::query_as::<_, AdminRow>(&format!(
            "UPDATE admins SET verified = TRUE WHERE id = $1 RETURNING {ADMIN_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        AdminAccount::try_from(row)
    }

    async fn user_by_id(&self, id: Uuid) -> LookupResult<UserAccount> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn user_by_email(&self, email: &str) -> LookupResult<UserAccount> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn insert_user(&self, user: NewUser) -> LookupResult<UserAccount> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, email, first_name, last_name, password_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn verify_user(&self, id: Uuid) -> LookupResult<UserAccount> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET verified = TRUE WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(role: &str, permissions: &[&str]) -> AdminRow {
        AdminRow {
            id: Uuid::new_v4(),
            email: "ops@everato.test".into(),
            username: "ops".into(),
            name: "Ops".into(),
            password_hash: "hash".into(),
            role: role.into(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            verified: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rows_decode_into_typed_roles_and_permissions() {
        let account =
            AdminAccount::try_from(row("EDITOR", &["EDIT_EVENT", "VIEW_EVENT"])).expect("decode");
        assert_eq!(account.role, Role::Editor);
        assert!(account.permissions.contains(Permission::EditEvent));
        assert_eq!(account.actor().id, account.target().id);
    }

    #[test]
    fn unknown_enum_values_are_database_faults() {
        assert!(matches!(
            AdminAccount::try_from(row("OWNER", &[])),
            Err(LookupError::Database(_))
        ));
        assert!(matches!(
            AdminAccount::try_from(row("ADMIN", &["FLY"])),
            Err(LookupError::Database(_))
        ));
    }

    #[tokio::test]
    async fn slow_lookups_hit_the_deadline() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, LookupError>(())
        };
        assert_eq!(
            within(Duration::from_millis(10), slow).await,
            Err(LookupError::DeadlineExceeded)
        );
        assert_eq!(
            within(Duration::from_secs(1), async { Ok::<_, LookupError>(7) }).await,
            Ok(7)
        );
    }

    #[test]
    fn missing_rows_are_not_found() {
        assert_eq!(LookupError::from(sqlx::Error::RowNotFound), LookupError::NotFound);
        assert!(matches!(
            LookupError::from(sqlx::Error::PoolTimedOut),
            LookupError::Database(_)
        ));
    }
}
