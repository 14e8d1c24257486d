use std::sync::Arc;

use log::{info, warn};
use rocket::{serde::json::Json, Route, State};

use crate::{
    clock::Clock,
    config::Config,
    error::{Error, Result},
    model::api::{
        admin::{AdminCredentials, AdminGrant},
        auth::AdminToken,
    },
};

pub fn routes() -> Vec<Route> {
    routes![admin_login]
}

#[post("/auth/admin", data = "<credentials>", format = "json")]
pub async fn admin_login(
    credentials: Json<AdminCredentials>,
    config: &State<Config>,
    clock: &State<Arc<dyn Clock>>,
) -> Result<Json<AdminGrant>> {
    // Always verify the password, so a wrong username costs the same as a wrong password.
    let password_ok =
        argon2::verify_encoded(config.admin_password_hash(), credentials.password.as_bytes())?;
    if !password_ok || credentials.username != config.admin_username() {
        warn!("Rejected admin login");
        return Err(Error::Unauthorized(
            "No admin found with the provided username and password combination.".to_string(),
        ));
    }

    let token = AdminToken::new(credentials.username.clone(), clock.now(), config.admin_ttl());
    let access_token = token.encode(config.jwt_secret())?;
    info!("Admin {} logged in", token.username);
    Ok(Json(AdminGrant {
        access_token,
        expires_at: token.expire_at,
    }))
}
