use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{ElectionStatus, Mobile},
    db::{Candidate, Election, Voter},
    mongodb::Id,
};

/// Raw admin credentials, received from a user. The password is only ever
/// checked against the configured hash, never stored.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// A freshly signed admin token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminGrant {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// A new election, as submitted by an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub name: String,
    pub constituency: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// An API-friendly election description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: Id,
    pub name: String,
    pub constituency: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ElectionStatus,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        Self {
            id: election.id,
            name: election.election.name,
            constituency: election.election.constituency,
            start_date: election.election.start_date,
            end_date: election.election.end_date,
            status: election.election.status,
        }
    }
}

/// A candidate to add to an election's roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    pub party: String,
    pub symbol: String,
    pub constituency: String,
}

/// A candidate as shown to admins and voters alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: Id,
    pub election_id: Id,
    pub name: String,
    pub party: String,
    pub symbol: String,
    pub constituency: String,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            election_id: candidate.election_id,
            name: candidate.name,
            party: candidate.party,
            symbol: candidate.symbol,
            constituency: candidate.constituency,
        }
    }
}

/// A voter to add to an election's roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterSpec {
    pub name: String,
    pub voter_number: String,
    pub mobile: Mobile,
    pub constituency: String,
}

/// A registered voter. The mobile number is not echoed back, as only its
/// keyed digest is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDescription {
    pub id: Id,
    pub election_id: Id,
    pub name: String,
    pub voter_number: String,
    pub constituency: String,
    pub has_voted: bool,
}

impl From<Voter> for VoterDescription {
    fn from(voter: Voter) -> Self {
        Self {
            id: voter.id,
            election_id: voter.voter.election_id,
            name: voter.voter.name,
            voter_number: voter.voter.voter_number,
            constituency: voter.voter.constituency,
            has_voted: voter.voter.has_voted,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use chrono::TimeZone;

    use super::*;

    impl ElectionSpec {
        pub fn example() -> Self {
            Self {
                name: "Student Council 2026".to_string(),
                constituency: "North Campus".to_string(),
                start_date: Utc.with_ymd_and_hms(2026, 11, 2, 8, 0, 0).unwrap(),
                end_date: Utc.with_ymd_and_hms(2026, 11, 2, 18, 0, 0).unwrap(),
            }
        }
    }

    impl CandidateSpec {
        pub fn example(name: &str) -> Self {
            Self {
                name: name.to_string(),
                party: format!("{name} Party"),
                symbol: format!("symbols/{}.png", name.to_lowercase()),
                constituency: "North Campus".to_string(),
            }
        }
    }

    impl VoterSpec {
        pub fn example(name: &str, mobile: Mobile) -> Self {
            Self {
                name: name.to_string(),
                voter_number: format!("NC-{}", name.to_uppercase()),
                mobile,
                constituency: "North Campus".to_string(),
            }
        }
    }
}
