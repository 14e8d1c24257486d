use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A candidate standing in exactly one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub name: String,
    pub party: String,
    /// Reference to the party or candidate symbol image.
    pub symbol: String,
    pub constituency: String,
}

impl Candidate {
    pub fn new(
        election_id: Id,
        name: String,
        party: String,
        symbol: String,
        constituency: String,
    ) -> Self {
        Self {
            id: Id::new(),
            election_id,
            name,
            party,
            symbol,
            constituency,
        }
    }
}
