use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::{common::MobileKey, mongodb::Id};

/// Core voter data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    /// Owning election.
    pub election_id: Id,
    pub name: String,
    /// The externally issued voter-ID number.
    pub voter_number: String,
    /// Keyed digest of the voter's mobile number. The number itself is not stored.
    pub mobile_key: MobileKey,
    pub constituency: String,
    /// Set exactly once, by the vote ledger, in the same transaction that
    /// records the ballot.
    pub has_voted: bool,
}

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Voter {
    /// A voter who has not voted yet.
    pub fn new(
        election_id: Id,
        name: String,
        voter_number: String,
        mobile_key: MobileKey,
        constituency: String,
    ) -> Self {
        Self {
            id: Id::new(),
            voter: VoterCore {
                election_id,
                name,
                voter_number,
                mobile_key,
                constituency,
                has_voted: false,
            },
        }
    }
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}
