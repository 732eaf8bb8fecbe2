use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Data, Request, Response};
use std::time::Instant;
use uuid::Uuid;

use crate::auth::guards::{admin_context, user_context};

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Identifier assigned to a request when it arrives.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Fairing to log one line per HTTP request with timing, request id and the
/// principal resolved by the auth gates (if any).
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
        request.local_cache(|| RequestId(Uuid::new_v4()));
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let duration = request.local_cache(Instant::now).elapsed();
        let RequestId(id) = *request.local_cache(|| RequestId(Uuid::new_v4()));

        let principal = admin_context(request)
            .map(|admin| admin.principal())
            .or_else(|| user_context(request).map(|user| user.principal()))
            .map_or_else(|| "-".to_string(), |principal| principal.to_string());

        response.set_header(Header::new(REQUEST_ID_HEADER, id.to_string()));

        log::info!(
            "[{}] {} {} -> {} ({:.2}ms) {}",
            id,
            request.method(),
            request.uri(),
            response.status().code,
            duration.as_secs_f64() * 1000.0,
            principal
        );
    }
}
