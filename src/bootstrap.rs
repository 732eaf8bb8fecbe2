//! Provisioning of the super users listed in the Rocket configuration.

use rocket::figment::Figment;
use serde::Deserialize;

use crate::auth::permissions::{PermissionSet, Role};
use crate::auth::store::{CredentialStore, LookupError, NewAdmin};
use crate::auth::{AuthError, PasswordService};

/// One `[[default.super_users]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SuperUserSeed {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid super_users configuration: {0}")]
    Config(String),
    #[error("failed to hash password for {email}: {source}")]
    Hash { email: String, source: AuthError },
    #[error("failed to create super user {email}: {source}")]
    Store { email: String, source: LookupError },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
}

/// Read `super_users`, treating an absent key as an empty list.
pub fn seeds_from_figment(figment: &Figment) -> Result<Vec<SuperUserSeed>, BootstrapError> {
    if figment.find_value("super_users").is_err() {
        return Ok(Vec::new());
    }
    figment
        .extract_inner::<Vec<SuperUserSeed>>("super_users")
        .map_err(|err| BootstrapError::Config(err.to_string()))
}

/// Create each seed as a `SUPER_ADMIN` holding every permission, skipping
/// seeds whose email or username is already taken.
pub async fn ensure_super_users(
    store: &dyn CredentialStore,
    passwords: &PasswordService,
    seeds: &[SuperUserSeed],
) -> Result<BootstrapReport, BootstrapError> {
    let mut report = BootstrapReport::default();

    for seed in seeds {
        let email = seed.email.trim().to_lowercase();
        log::info!("provisioning super user {} <{}>", seed.username, email);

        let password_hash =
            passwords
                .hash_password(&seed.password)
                .map_err(|source| BootstrapError::Hash {
                    email: email.clone(),
                    source,
                })?;

        let result = store
            .insert_admin(NewAdmin {
                email: email.clone(),
                username: seed.username.trim().to_string(),
                name: seed.name.trim().to_string(),
                password_hash,
                role: Role::SuperAdmin,
                permissions: PermissionSet::all(),
            })
            .await;

        match result {
            Ok(admin) => {
                log::info!("created super user {} ({})", admin.username, admin.id);
                report.created.push(email);
            }
            Err(LookupError::Conflict(_)) => {
                log::info!("super user {email} already exists, skipping");
                report.skipped.push(email);
            }
            Err(source) => {
                log::error!("failed to create super user {email}: {source}");
                return Err(BootstrapError::Store { email, source });
            }
        }
    }

    Ok(report)
}
