use std::sync::Arc;
use std::time::Duration;

use everato_api::api_routes;
use everato_api::auth::permissions::{PermissionSet, Role};
use everato_api::auth::responses::{UserSummary, VerificationOutcome};
use everato_api::auth::store::AdminAccount;
use everato_api::auth::{CredentialStore, PrincipalKind, TokenSigner};
use everato_api::mailer::{
    MailError, Mailer, OutgoingMail, USER_VERIFICATION_SUBJECT, VERIFICATION_SUBJECT,
    email_verification_link, verification_link,
};
use everato_api::test_support::{
    InMemoryCredentialStore, TestRocketBuilder, test_auth_config, test_auth_state,
};
use parking_lot::Mutex;
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use rocket::serde::json::json;

/// Keeps every message instead of sending it.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingMailer {
    /// Wait for the detached delivery task to hand over a message.
    async fn next_mail(&self) -> OutgoingMail {
        for _ in 0..100 {
            if let Some(mail) = self.sent.lock().pop() {
                return mail;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no mail was delivered");
    }
}

#[rocket::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        self.sent.lock().push(mail);
        Ok(())
    }
}

struct BrokenMailer;

#[rocket::async_trait]
impl Mailer for BrokenMailer {
    async fn send(&self, _: OutgoingMail) -> Result<(), MailError> {
        Err(MailError::Transport("smtp relay refused the connection".into()))
    }
}

struct Setup {
    store: Arc<InMemoryCredentialStore>,
    root: AdminAccount,
    editor: AdminAccount,
}

impl Setup {
    fn new() -> Self {
        let store = Arc::new(InMemoryCredentialStore::new());
        let root = store.seed_admin("root", Role::SuperAdmin, PermissionSet::all(), "unused");
        let editor = store.seed_admin("editor", Role::Editor, PermissionSet::new(), "unused");
        Self {
            store,
            root,
            editor,
        }
    }

    async fn client(&self, mailer: Arc<dyn Mailer>) -> Client {
        let state = test_auth_state(Some(self.store.clone() as Arc<dyn CredentialStore>))
            .with_mailer(mailer);
        TestRocketBuilder::new()
            .manage_auth_state(state)
            .mount_api_routes(api_routes())
            .async_client()
            .await
    }
}

fn bearer(admin: &AdminAccount) -> Header<'static> {
    let token = TokenSigner::from_config(&test_auth_config())
        .expect("signer")
        .issue(admin.id, PrincipalKind::Admin)
        .expect("issue")
        .token;
    Header::new("Authorization", format!("Bearer {token}"))
}

#[rocket::async_test]
async fn admin_verification_mail_reaches_the_target() {
    let setup = Setup::new();
    let mailer = Arc::new(RecordingMailer::default());
    let client = setup.client(mailer.clone()).await;

    let response = client
        .post(format!(
            "/api/v1/admin/send-verification/{}",
            setup.editor.id
        ))
        .header(bearer(&setup.root))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let mail = mailer.next_mail().await;
    let link = verification_link(&test_auth_config().api_url, setup.editor.id);
    assert_eq!(mail.to, setup.editor.email);
    assert_eq!(mail.subject, VERIFICATION_SUBJECT);
    assert!(mail.body.contains(&link), "{}", mail.body);
}

#[rocket::async_test]
async fn failing_transport_does_not_fail_the_request() {
    let setup = Setup::new();
    let client = setup.client(Arc::new(BrokenMailer)).await;

    let response = client
        .post(format!(
            "/api/v1/admin/send-verification/{}",
            setup.editor.id
        ))
        .header(bearer(&setup.root))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(
            json!({
                "email": "grace@example.com",
                "first_name": "Grace",
                "last_name": "Hopper",
                "password": "cobol-forever"
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);
}

#[rocket::async_test]
async fn registration_mails_a_link_that_verifies_the_user() {
    let setup = Setup::new();
    let mailer = Arc::new(RecordingMailer::default());
    let client = setup.client(mailer.clone()).await;

    let response = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(
            json!({
                "email": "Grace@Example.com",
                "first_name": "Grace",
                "last_name": "Hopper",
                "password": "cobol-forever"
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);
    let user: UserSummary = response.into_json().await.expect("user summary");
    assert!(!user.verified);

    let mail = mailer.next_mail().await;
    let link = email_verification_link(&test_auth_config().api_url, user.id);
    assert_eq!(mail.to, "grace@example.com");
    assert_eq!(mail.subject, USER_VERIFICATION_SUBJECT);
    assert!(mail.body.contains(&link), "{}", mail.body);

    // Follow the mailed link relative to the mount point.
    let path = link.replace(&test_auth_config().api_url, "/api/v1");
    let response = client.get(path.clone()).dispatch().await;
    assert_eq!(response.status(), Status::Accepted);
    let outcome: VerificationOutcome = response.into_json().await.expect("outcome");
    assert_eq!(outcome.id, user.id);
    assert!(!outcome.already_verified);

    let response = client.get(path).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let outcome: VerificationOutcome = response.into_json().await.expect("outcome");
    assert!(outcome.already_verified);
}
