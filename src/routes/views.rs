//! Browser-facing pages. Their gates use redirect mode, so an anonymous
//! visitor is sent to the matching sign-in page instead of getting a 401.

use rocket::response::content::RawHtml;

use crate::auth::{AdminGate, AuthUser, RequireAdmin, UserGate, Views};

fn page(title: &str, body: &str) -> RawHtml<String> {
    RawHtml(format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{title} | Everato</title></head>\
         <body><main><h1>{title}</h1>{body}</main></body></html>\n"
    ))
}

#[get("/auth/login")]
pub fn user_login_page(_gate: UserGate<Views>) -> RawHtml<String> {
    page(
        "Sign in",
        "<form method=\"post\" action=\"/api/v1/auth/login\">\
         <input name=\"email\" type=\"email\"><input name=\"password\" type=\"password\">\
         <button>Sign in</button></form>",
    )
}

#[get("/admin/login")]
pub fn admin_login_page(_gate: AdminGate<Views>) -> RawHtml<String> {
    page(
        "Administrator sign in",
        "<form method=\"post\" action=\"/api/v1/admin/login\">\
         <input name=\"login\"><input name=\"password\" type=\"password\">\
         <button>Sign in</button></form>",
    )
}

#[get("/dashboard")]
pub fn dashboard(current: AuthUser<Views>) -> RawHtml<String> {
    page(
        "Dashboard",
        &format!("<p>Signed in as {}</p>", escape(&current.user.email)),
    )
}

#[get("/admin/dashboard")]
pub fn admin_dashboard(admin: RequireAdmin<Views>) -> RawHtml<String> {
    page(
        "Admin dashboard",
        &format!(
            "<p>Signed in as {} ({})</p>",
            escape(&admin.account.username),
            admin.account.role
        ),
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
