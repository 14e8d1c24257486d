use rocket::{serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            admin::CandidateDescription,
            auth::BearerToken,
            vote::{CastReceipt, CastRequest},
        },
        mongodb::Id,
    },
    service::VoteLedger,
};

pub fn routes() -> Vec<Route> {
    routes![candidates, cast]
}

/// The ballot paper: candidates standing in the credential's constituency.
#[get("/vote/candidates?<election_id>&<constituency>")]
pub async fn candidates(
    token: std::result::Result<BearerToken, Error>,
    election_id: Id,
    constituency: Option<&str>,
    ledger: &State<VoteLedger>,
) -> Result<Json<Vec<CandidateDescription>>> {
    let token = token?;
    let candidates = ledger
        .candidates(&token.0, election_id, constituency)
        .await?
        .into_iter()
        .map(CandidateDescription::from)
        .collect();
    Ok(Json(candidates))
}

#[post("/vote/cast", data = "<request>", format = "json")]
pub async fn cast(
    token: std::result::Result<BearerToken, Error>,
    request: Json<CastRequest>,
    ledger: &State<VoteLedger>,
) -> Result<Json<CastReceipt>> {
    let token = token?;
    ledger
        .cast_vote(&token.0, request.election_id, request.candidate_id)
        .await?;
    Ok(Json(CastReceipt::recorded()))
}
