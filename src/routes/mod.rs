//! HTTP route handlers grouped by audience.
//!
//! JSON handlers are annotated with `#[openapi]` so `rocket_okapi` can derive
//! the OpenAPI document; the browser pages in [`views`] are plain routes.

pub mod admin;
pub mod auth;
pub mod health;
pub(crate) mod helpers;
pub mod views;
