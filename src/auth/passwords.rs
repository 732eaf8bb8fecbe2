use argon2::{
    Algorithm, Argon2, ParamsBuilder, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::RngCore;

use crate::auth::{AuthError, AuthResult};

const SALT_LEN: usize = 16;

#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
    // Verified against when the login name is unknown, so both paths cost
    // one argon2 run.
    decoy_hash: String,
}

impl PasswordService {
    pub fn new() -> AuthResult<Self> {
        let mut builder = ParamsBuilder::new();
        builder.m_cost(19 * 1024); // 19 MiB
        builder.t_cost(2);
        builder.p_cost(1);
        let params = builder.build()?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let decoy_hash = hash_with(&argon2, "everato-decoy-password")?;
        Ok(Self { argon2, decoy_hash })
    }

    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        hash_with(&self.argon2, password)
    }

    pub fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(encoded)?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(AuthError::from(err)),
        }
    }

    /// Check `password` against `encoded` when an account was found, or burn
    /// an equivalent verification when it was not. Either way a mismatch is
    /// `InvalidCredentials`.
    pub fn check_login(&self, password: &str, encoded: Option<&str>) -> AuthResult<()> {
        match encoded {
            Some(encoded) if self.verify_password(password, encoded)? => Ok(()),
            Some(_) => Err(AuthError::InvalidCredentials),
            None => {
                let _ = self.verify_password(password, &self.decoy_hash);
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}

fn hash_with(argon2: &Argon2<'static>, password: &str) -> AuthResult<String> {
    let mut salt_bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)?;
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}
