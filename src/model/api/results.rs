use serde::{Deserialize, Serialize};

use crate::model::{common::ElectionStatus, mongodb::Id};

/// Participation figures. Always visible; never reveals preference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub total_voters: u64,
    pub voted_voters: u64,
    pub total_votes: u64,
    /// Percentage of registered voters who have voted, to two decimal places.
    pub turnout_percentage: f64,
}

/// Votes received by one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: Id,
    pub name: String,
    pub party: String,
    pub votes: u64,
}

/// Outcome of an election. A tie for the top count produces no winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Winner {
    Decided {
        candidate_id: Id,
        name: String,
        votes: u64,
    },
    Tie {
        candidate_ids: Vec<Id>,
        votes: u64,
    },
    NoVotes,
}

/// Per-candidate results. Only ever computed for a completed election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    /// Every candidate, most votes first, ties in name order.
    pub tallies: Vec<CandidateTally>,
    pub winner: Winner,
}

/// The results view of an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election_id: Id,
    pub status: ElectionStatus,
    #[serde(flatten)]
    pub aggregate: Aggregate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Vec<CandidateTally>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
}
