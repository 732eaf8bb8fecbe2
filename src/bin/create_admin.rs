use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use everato_api::auth::permissions::{Permission, PermissionSet, Role, UnknownVariant};
use everato_api::auth::store::{CredentialStore, LookupError, NewAdmin};
use everato_api::auth::{PasswordService, PgCredentialStore};
use everato_api::db::MIGRATOR;

#[derive(Parser, Debug)]
#[command(name = "create_admin", about = "Create an Everato administrator account")]
struct Args {
    /// Email address for the account (case insensitive).
    #[arg(long)]
    email: String,

    /// Login name, unique across administrators.
    #[arg(long)]
    username: String,

    /// Plaintext password to hash and store for this admin.
    #[arg(long)]
    password: String,

    /// Display name; defaults to the username.
    #[arg(long)]
    name: Option<String>,

    /// Role to assign (`SUPER_ADMIN`, `ADMIN` or `EDITOR`).
    #[arg(long, default_value = "ADMIN")]
    role: String,

    /// Comma separated permissions. Super admins always receive all of them.
    #[arg(long, value_delimiter = ',')]
    permissions: Vec<String>,
}

/// Parse the role and permission flags. Super admins always get every
/// permission, whatever was passed.
fn resolve_grants(
    role: &str,
    permissions: &[String],
) -> Result<(Role, PermissionSet), UnknownVariant> {
    let role: Role = role.trim().to_uppercase().parse()?;
    if role.is_super_admin() {
        return Ok((role, PermissionSet::all()));
    }

    let granted = permissions
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_uppercase().parse::<Permission>())
        .collect::<Result<PermissionSet, _>>()?;
    Ok((role, granted))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let email = args.email.trim().to_lowercase();

    if !email.contains('@') {
        writeln!(io::stderr(), "error: email must contain '@'")?;
        std::process::exit(1);
    }

    let (role, permissions) = match resolve_grants(&args.role, &args.permissions) {
        Ok(grants) => grants,
        Err(err) => {
            writeln!(io::stderr(), "error: {err}")?;
            std::process::exit(1);
        }
    };

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    MIGRATOR.run(&pool).await?;

    let password_service = PasswordService::new().map_err(|err| {
        io::Error::new(io::ErrorKind::Other, format!("argon2 init failed: {err}"))
    })?;
    let password_hash = password_service
        .hash_password(&args.password)
        .map_err(|err| {
            io::Error::new(io::ErrorKind::Other, format!("password hash failed: {err}"))
        })?;

    let username = args.username.trim().to_string();
    let store = PgCredentialStore::new(pool);
    let created = store
        .insert_admin(NewAdmin {
            email: email.clone(),
            name: args.name.unwrap_or_else(|| username.clone()),
            username,
            password_hash,
            role,
            permissions,
        })
        .await;

    match created {
        Ok(admin) => {
            println!(
                "Created {} '{}' <{}> with id {}",
                admin.role, admin.username, admin.email, admin.id
            );
            Ok(())
        }
        Err(LookupError::Conflict(_)) => {
            writeln!(
                io::stderr(),
                "error: an admin with email '{email}' or that username already exists."
            )?;
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn flags_parse_case_insensitively() {
        let (role, permissions) =
            resolve_grants("editor", &flags(&["view_event", " ", "MANAGE_BOOKINGS"]))
                .expect("valid flags");
        assert_eq!(role, Role::Editor);
        assert_eq!(permissions.len(), 2);
        assert!(permissions.contains(Permission::ViewEvent));
    }

    #[test]
    fn super_admins_receive_every_permission() {
        let (role, permissions) = resolve_grants("SUPER_ADMIN", &[]).expect("valid flags");
        assert_eq!(role, Role::SuperAdmin);
        assert_eq!(permissions, PermissionSet::all());
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(resolve_grants("OWNER", &[]).is_err());
        assert!(resolve_grants("ADMIN", &flags(&["FLY"])).is_err());
    }

    #[test]
    fn store_failures_convert_into_the_main_error_type() {
        let err: Box<dyn std::error::Error> =
            LookupError::Database("connection refused".into()).into();
        assert!(err.to_string().contains("connection refused"));
    }
}
