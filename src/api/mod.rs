use rocket::{http::Status, serde::json::Json, Catcher, Request, Route};

use crate::error::ErrorBody;

pub mod admin;
pub mod auth;
pub mod otp;
pub mod results;
pub mod vote;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(otp::routes());
    routes.extend(vote::routes());
    routes.extend(admin::routes());
    routes.extend(results::routes());
    routes.extend(auth::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Failures that never reach a handler (unmatched routes, malformed bodies,
/// failed guards) get the same JSON shape as handler errors.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> (Status, Json<ErrorBody>) {
    let error = match status.code {
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        500..=599 => "Internal",
        _ => "BadRequest",
    };
    let body = ErrorBody {
        error,
        message: status.reason().unwrap_or("request failed").to_string(),
    };
    (status, Json(body))
}
