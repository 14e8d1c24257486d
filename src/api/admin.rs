use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::{
            admin::{
                CandidateDescription, CandidateSpec, ElectionDescription, ElectionSpec,
                VoterDescription, VoterSpec,
            },
            auth::AdminToken,
        },
        mongodb::Id,
    },
    service::ElectionLifecycle,
};

pub fn routes() -> Vec<Route> {
    routes![
        create_election,
        get_election,
        delete_election,
        start_election,
        end_election,
        add_candidate,
        remove_candidate,
        add_voter,
        remove_voter,
    ]
}

#[post("/elections", data = "<spec>", format = "json")]
pub async fn create_election(
    _token: AdminToken,
    spec: Json<ElectionSpec>,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<Json<ElectionDescription>> {
    let election = lifecycle.create(spec.0).await?;
    Ok(Json(election.into()))
}

#[get("/elections/<election_id>")]
pub async fn get_election(
    _token: AdminToken,
    election_id: Id,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<Json<ElectionDescription>> {
    let election = lifecycle.election(election_id).await?;
    Ok(Json(election.into()))
}

#[delete("/elections/<election_id>")]
pub async fn delete_election(
    _token: AdminToken,
    election_id: Id,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<()> {
    lifecycle.delete(election_id).await
}

#[post("/elections/<election_id>/start")]
pub async fn start_election(
    _token: AdminToken,
    election_id: Id,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<Json<ElectionDescription>> {
    let election = lifecycle.start(election_id).await?;
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/end")]
pub async fn end_election(
    _token: AdminToken,
    election_id: Id,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<Json<ElectionDescription>> {
    let election = lifecycle.end(election_id).await?;
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/candidates", data = "<spec>", format = "json")]
pub async fn add_candidate(
    _token: AdminToken,
    election_id: Id,
    spec: Json<CandidateSpec>,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<Json<CandidateDescription>> {
    let candidate = lifecycle.add_candidate(election_id, spec.0).await?;
    Ok(Json(candidate.into()))
}

#[delete("/elections/<election_id>/candidates/<candidate_id>")]
pub async fn remove_candidate(
    _token: AdminToken,
    election_id: Id,
    candidate_id: Id,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<()> {
    lifecycle.remove_candidate(election_id, candidate_id).await
}

#[post("/elections/<election_id>/voters", data = "<spec>", format = "json")]
pub async fn add_voter(
    _token: AdminToken,
    election_id: Id,
    spec: Json<VoterSpec>,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<Json<VoterDescription>> {
    let voter = lifecycle.add_voter(election_id, spec.0).await?;
    Ok(Json(voter.into()))
}

#[delete("/elections/<election_id>/voters/<voter_id>")]
pub async fn remove_voter(
    _token: AdminToken,
    election_id: Id,
    voter_id: Id,
    lifecycle: &State<ElectionLifecycle>,
) -> Result<()> {
    lifecycle.remove_voter(election_id, voter_id).await
}
