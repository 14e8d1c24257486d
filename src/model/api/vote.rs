use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A vote, as submitted with a session credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastRequest {
    pub candidate_id: Id,
    pub election_id: Id,
}

/// Acknowledgement of a recorded vote. Deliberately carries nothing about
/// the voter or the choice made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastReceipt {
    pub status: CastStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastStatus {
    Recorded,
}

impl CastReceipt {
    pub fn recorded() -> Self {
        Self {
            status: CastStatus::Recorded,
        }
    }
}
