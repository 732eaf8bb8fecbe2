//! Outbound mail seam used for account verification messages.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub const VERIFICATION_SUBJECT: &str = "Verify your admin account - Everato Platform";
pub const USER_VERIFICATION_SUBJECT: &str = "Verify your Everato account";

/// Upper bound for a single detached delivery.
pub const DELIVERY_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(String),
    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),
}

#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}

/// Writes each message to the log instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[rocket::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        if !mail.to.contains('@') {
            return Err(MailError::InvalidRecipient(mail.to));
        }
        log::info!("mail to {} with subject '{}'", mail.to, mail.subject);
        log::debug!("mail body:\n{}", mail.body);
        Ok(())
    }
}

pub fn verification_link(api_url: &str, admin_id: uuid::Uuid) -> String {
    format!("{}/admin/verify/{}", api_url.trim_end_matches('/'), admin_id)
}

pub fn verification_mail(to: &str, name: &str, link: &str) -> OutgoingMail {
    OutgoingMail {
        to: to.to_string(),
        subject: VERIFICATION_SUBJECT.to_string(),
        body: format!(
            "Hello {name},\n\n\
             An administrator account was created for {to} on the Everato platform.\n\
             Confirm the address by opening the link below:\n\n\
             {link}\n\n\
             If you did not expect this message you can ignore it.\n"
        ),
    }
}

/// Link a registered user follows to confirm their email address.
pub fn email_verification_link(api_url: &str, uid: uuid::Uuid) -> String {
    format!("{}/auth/verify-email?uid={}", api_url.trim_end_matches('/'), uid)
}

pub fn user_verification_mail(to: &str, name: &str, link: &str) -> OutgoingMail {
    OutgoingMail {
        to: to.to_string(),
        subject: USER_VERIFICATION_SUBJECT.to_string(),
        body: format!(
            "Hello {name},\n\n\
             Thanks for signing up to Everato.\n\
             Confirm your email address by opening the link below:\n\n\
             {link}\n"
        ),
    }
}

/// Send `mail`, giving up once `deadline` has passed.
pub async fn deliver(
    mailer: &dyn Mailer,
    mail: OutgoingMail,
    deadline: Duration,
) -> Result<(), MailError> {
    match tokio::time::timeout(deadline, mailer.send(mail)).await {
        Ok(result) => result,
        Err(_) => Err(MailError::Transport(format!(
            "no response within {}",
            humantime::format_duration(deadline)
        ))),
    }
}

/// Hand `mail` to `mailer` on a detached task. The caller never waits and
/// never sees the outcome; failures are only logged.
pub fn dispatch_detached(mailer: Arc<dyn Mailer>, mail: OutgoingMail) {
    tokio::spawn(async move {
        let recipient = mail.to.clone();
        match deliver(mailer.as_ref(), mail, DELIVERY_DEADLINE).await {
            Ok(()) => log::info!("verification mail sent to {recipient}"),
            Err(err) => log::error!("failed to send mail to {recipient}: {err}"),
        }
    });
}
