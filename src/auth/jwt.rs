use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::auth::context::PrincipalKind;
use crate::auth::{AuthConfig, AuthError, AuthResult};

/// The only algorithm tokens are signed with or accepted under.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Signed claim set carried by session tokens.
///
/// `uid` defaults to an empty string when absent so the guards, not the
/// decoder, decide what a token without a subject id means.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub uid: String,
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    token_ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &[u8], issuer: impl Into<String>, token_ttl: Duration) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.set_issuer(&[issuer.clone()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        // Audience encodes the principal kind; guards look at the store instead.
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
            token_ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        if config.jwt_secret.is_empty() {
            return Err(AuthError::Config("signing secret must not be empty".into()));
        }
        Ok(Self::new(
            config.jwt_secret.as_bytes(),
            config.issuer.clone(),
            config.token_ttl,
        ))
    }

    pub fn sign(&self, claims: &Claims) -> AuthResult<String> {
        encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding_key)
            .map_err(|err| AuthError::Signing(err.to_string()))
    }

    /// Verify signature, algorithm, issuer and expiry, returning the claims.
    ///
    /// Every failure is reported as [`AuthError::InvalidToken`]; the precise
    /// cause is only logged.
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => {
                log::debug!("token rejected: {:?}", err.kind());
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Build and sign claims for `uid` valid for the configured lifetime.
    pub fn issue(&self, uid: Uuid, kind: PrincipalKind) -> AuthResult<SignedToken> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|err| AuthError::Config(format!("token lifetime out of range: {err}")))?;
        let expires_at = now + ttl;

        let claims = Claims {
            sub: format!("{kind}:{uid}"),
            aud: format!("{}-{kind}", self.issuer),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            uid: uid.to_string(),
        };

        let token = self.sign(&claims)?;
        Ok(SignedToken { token, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_JWT_SECRET: &str = "super-secret-test-key";

    fn signer() -> TokenSigner {
        TokenSigner::new(
            TEST_JWT_SECRET.as_bytes(),
            "everato",
            Duration::from_secs(900),
        )
    }

    fn claims_expiring_at(exp: i64) -> Claims {
        let uid = Uuid::new_v4();
        Claims {
            sub: format!("user:{uid}"),
            aud: "everato-user".into(),
            iss: "everato".into(),
            iat: exp - 900,
            exp,
            uid: uid.to_string(),
        }
    }

    #[test]
    fn signed_claims_verify_unchanged() {
        let signer = signer();
        let claims = claims_expiring_at(Utc::now().timestamp() + 600);

        let token = signer.sign(&claims).expect("sign");
        let verified = signer.verify(&token).expect("verify");

        assert_eq!(verified, claims);
    }

    #[test]
    fn issued_tokens_carry_subject_and_lifetime() {
        let signer = signer();
        let uid = Uuid::new_v4();

        let issued = signer.issue(uid, PrincipalKind::Admin).expect("issue");
        let claims = signer.verify(&issued.token).expect("verify");

        assert_eq!(claims.uid, uid.to_string());
        assert_eq!(claims.sub, format!("admin:{uid}"));
        assert_eq!(claims.aud, "everato-admin");
        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(claims.exp, issued.expires_at.timestamp());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let signer = signer();
        let token = signer
            .sign(&claims_expiring_at(Utc::now().timestamp() - 5))
            .expect("sign");

        assert_eq!(signer.verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn tokens_from_another_key_are_rejected() {
        let other = TokenSigner::new(b"another-secret", "everato", Duration::from_secs(900));
        let token = other
            .sign(&claims_expiring_at(Utc::now().timestamp() + 600))
            .expect("sign");

        assert_eq!(signer().verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let signer = signer();
        let token = signer
            .sign(&claims_expiring_at(Utc::now().timestamp() + 600))
            .expect("sign");

        let signature_start = token.rfind('.').expect("three segments") + 1;
        let mut bytes = token.into_bytes();
        bytes[signature_start] = if bytes[signature_start] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).expect("ascii token");

        assert_eq!(signer.verify(&tampered), Err(AuthError::InvalidToken));
    }

    #[test]
    fn garbage_is_rejected_without_panicking() {
        let signer = signer();
        for token in ["", "abc.def.ghi", "not-a-token", "a.b", "...."] {
            assert_eq!(signer.verify(token), Err(AuthError::InvalidToken), "{token}");
        }
    }

    #[test]
    fn other_hmac_algorithms_are_rejected() {
        let claims = claims_expiring_at(Utc::now().timestamp() + 600);
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("sign hs512");

        assert_eq!(signer().verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let foreign = TokenSigner::new(
            TEST_JWT_SECRET.as_bytes(),
            "someone-else",
            Duration::from_secs(900),
        );
        let issued = foreign
            .issue(Uuid::new_v4(), PrincipalKind::User)
            .expect("issue");

        assert_eq!(signer().verify(&issued.token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn unknown_claims_are_ignored_and_missing_uid_defaults_to_empty() {
        let now = Utc::now().timestamp();
        let payload = json!({
            "sub": "user:someone",
            "aud": "everato-user",
            "iss": "everato",
            "iat": now,
            "exp": now + 600,
            "role": "ADMIN",
            "scope": ["a", "b"],
        });
        let token = encode(
            &Header::new(SIGNING_ALGORITHM),
            &payload,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("sign");

        let claims = signer().verify(&token).expect("verify");
        assert!(claims.uid.is_empty());
        assert_eq!(claims.sub, "user:someone");
    }

    #[test]
    fn tokens_missing_required_claims_are_rejected() {
        let now = Utc::now().timestamp();
        let payload = json!({
            "sub": "user:someone",
            "iss": "everato",
            "iat": now,
            "exp": now + 600,
            "uid": Uuid::new_v4().to_string(),
        });
        let token = encode(
            &Header::new(SIGNING_ALGORITHM),
            &payload,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("sign");

        assert_eq!(signer().verify(&token), Err(AuthError::InvalidToken));
    }
}
