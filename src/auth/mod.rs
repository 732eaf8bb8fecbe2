//! Authentication and authorization: token signing, request gates, the
//! permission evaluator and the credential store seam.

use std::sync::Arc;

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod guards;
pub mod jwt;
pub mod passwords;
pub mod permissions;
pub mod responses;
pub mod store;

pub use config::AuthConfig;
pub use context::{AdminContext, Principal, PrincipalKind, UserContext};
pub use error::{AuthError, AuthResult};
pub use guards::{AdminGate, Api, AuthUser, GuardSet, RequireAdmin, UserGate, Views};
pub use jwt::TokenSigner;
pub use passwords::PasswordService;
pub use store::{CredentialStore, PgCredentialStore};

use crate::mailer::{LogMailer, Mailer};

#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub signer: Arc<TokenSigner>,
    pub passwords: Arc<PasswordService>,
    pub store: Option<Arc<dyn CredentialStore>>,
    pub mailer: Arc<dyn Mailer>,
    pub guards: Arc<GuardSet>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        passwords: PasswordService,
        store: Option<Arc<dyn CredentialStore>>,
    ) -> AuthResult<Self> {
        let signer = Arc::new(TokenSigner::from_config(&config)?);
        let guards = GuardSet::new(&config, signer.clone(), store.clone())?;

        Ok(Self {
            config,
            signer,
            passwords: Arc::new(passwords),
            store,
            mailer: Arc::new(LogMailer),
            guards: Arc::new(guards),
        })
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }
}
