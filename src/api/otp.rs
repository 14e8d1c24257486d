use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::api::otp::{AccessGrant, OtpSendRequest, OtpVerifyRequest},
    service::{OtpGateway, VoterAuthenticator},
};

pub fn routes() -> Vec<Route> {
    routes![send, verify]
}

#[post("/otp/send", data = "<request>", format = "json")]
pub async fn send(request: Json<OtpSendRequest>, gateway: &State<OtpGateway>) -> Result<Status> {
    gateway.send_otp(&request.mobile).await?;
    Ok(Status::Accepted)
}

#[post("/otp/verify", data = "<request>", format = "json")]
pub async fn verify(
    request: Json<OtpVerifyRequest>,
    gateway: &State<OtpGateway>,
    authenticator: &State<VoterAuthenticator>,
) -> Result<Json<AccessGrant>> {
    let voter = gateway
        .verify_otp(&request.mobile, &request.otp, request.election_id)
        .await?;
    let grant = authenticator.authenticate(&request.mobile, &voter).await?;
    Ok(Json(grant))
}
