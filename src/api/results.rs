use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::results::{Breakdown, ElectionResults},
        mongodb::Id,
    },
    service::TallyEngine,
};

pub fn routes() -> Vec<Route> {
    routes![election_results, election_breakdown]
}

/// Participation always; per-candidate counts and winner once COMPLETED.
#[get("/results/<election_id>")]
pub async fn election_results(
    election_id: Id,
    tally: &State<TallyEngine>,
) -> Result<Json<ElectionResults>> {
    Ok(Json(tally.results(election_id).await?))
}

#[get("/results/<election_id>/breakdown")]
pub async fn election_breakdown(
    election_id: Id,
    tally: &State<TallyEngine>,
) -> Result<Json<Breakdown>> {
    Ok(Json(tally.compute_breakdown(election_id).await?))
}
