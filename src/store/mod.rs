//! Datastore seams.
//!
//! Each trait is implemented twice: over MongoDB for deployment, and in
//! process for tests and single-node embedding. Services only ever see the
//! traits, bundled together as [`Stores`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::{Client, Database};

use crate::{
    clock::Clock,
    error::Result,
    model::{
        common::{ElectionStatus, LifecycleAction, MobileKey},
        db::{Candidate, Election, OtpRecord, SessionRecord, Vote, Voter},
        mongodb::Id,
    },
};

mod memory;
mod mongo;

pub use memory::{MemoryCredentialStore, MemoryElectionStore, MemoryOtpStore};
pub use mongo::{MongoCredentialStore, MongoElectionStore, MongoOtpStore};

/// Result of an attempted change to an election's roll of candidates and voters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollEdit {
    Applied,
    /// The election is not INACTIVE; carries the status it was found in.
    Locked(ElectionStatus),
    /// The election, or the row to remove, does not exist.
    Missing,
    /// A voter with the same mobile is already registered for the election.
    Duplicate,
}

/// Result of an attempted lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The step was taken; carries the status reached.
    Applied(ElectionStatus),
    /// The step is not legal from the status the election is in.
    Refused(ElectionStatus),
    Missing,
}

/// Result of the exactly-once voting transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// `has_voted` flipped and the vote row was written, together.
    Recorded,
    /// `has_voted` was already set; nothing was written.
    AlreadyVoted,
    ElectionNotActive,
    /// No such voter in the vote's election.
    UnknownVoter,
}

/// Participation figures for one election. These never reveal preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Participation {
    pub total_voters: u64,
    pub voted_voters: u64,
    pub total_votes: u64,
}

/// Elections and everything they own: candidates, voters and votes.
#[rocket::async_trait]
pub trait ElectionStore: Send + Sync {
    async fn insert_election(&self, election: &Election) -> Result<()>;

    async fn election(&self, id: Id) -> Result<Option<Election>>;

    async fn elections_with_status(&self, status: ElectionStatus) -> Result<Vec<Election>>;

    /// Atomically apply `action` to election `id`. Only the forward steps of
    /// [`ElectionStatus::apply`] are ever taken; anything else is refused and
    /// changes nothing.
    async fn transition(&self, id: Id, action: LifecycleAction) -> Result<Transition>;

    /// Delete the election with all its candidates, voters and votes, as one
    /// unit. Returns false if there was no such election.
    async fn delete_election(&self, id: Id) -> Result<bool>;

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<RollEdit>;

    async fn remove_candidate(&self, election_id: Id, candidate_id: Id) -> Result<RollEdit>;

    async fn insert_voter(&self, voter: &Voter) -> Result<RollEdit>;

    async fn remove_voter(&self, election_id: Id, voter_id: Id) -> Result<RollEdit>;

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>>;

    /// Candidates of an election, optionally restricted to one constituency.
    async fn candidates(&self, election_id: Id, constituency: Option<&str>)
        -> Result<Vec<Candidate>>;

    async fn voter(&self, id: Id) -> Result<Option<Voter>>;

    /// Every voter row registered under the given mobile, across elections.
    async fn voters_by_mobile(&self, mobile: &MobileKey) -> Result<Vec<Voter>>;

    /// Set the voter's `has_voted` flag from false to true and insert `vote`,
    /// indivisibly, provided the vote's election is ACTIVE at that moment.
    ///
    /// Implementations serialise per voter only. Calls for different voters
    /// must be able to proceed in parallel.
    async fn record_vote(&self, voter_id: Id, vote: &Vote) -> Result<LedgerOutcome>;

    async fn participation(&self, election_id: Id) -> Result<Participation>;

    /// Number of votes per candidate. Candidates with no votes are absent.
    async fn vote_counts(&self, election_id: Id) -> Result<HashMap<Id, u64>>;
}

/// Keyed, expiring store of the live OTP per mobile.
#[rocket::async_trait]
pub trait OtpStore: Send + Sync {
    /// Store `record`, replacing any earlier record for the same mobile.
    async fn issue(&self, record: &OtpRecord) -> Result<()>;

    async fn current(&self, mobile: &MobileKey) -> Result<Option<OtpRecord>>;

    /// Atomically count one verification attempt against the record issued
    /// with `nonce`, provided it is unconsumed and has had fewer than `max`
    /// attempts. Returns the new attempt count, or `None` if nothing was claimed.
    async fn claim_attempt(&self, mobile: &MobileKey, nonce: Id, max: u32)
        -> Result<Option<u32>>;

    /// Mark the record issued with `nonce` consumed. Returns false if it was
    /// already consumed or has been replaced.
    async fn consume(&self, mobile: &MobileKey, nonce: Id) -> Result<bool>;
}

/// Keyed, expiring store of live session credentials.
#[rocket::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn register(&self, session: &SessionRecord) -> Result<()>;

    /// Is the credential registered, unrevoked and unexpired at `now`?
    async fn is_live(&self, jti: Id, now: DateTime<Utc>) -> Result<bool>;

    /// Returns false if there was nothing to revoke.
    async fn revoke(&self, jti: Id) -> Result<bool>;
}

/// The three stores, shared by every service.
#[derive(Clone)]
pub struct Stores {
    pub elections: Arc<dyn ElectionStore>,
    pub otps: Arc<dyn OtpStore>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl Stores {
    /// In-process stores. Expired OTPs and credentials are swept against `clock`.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            elections: Arc::new(MemoryElectionStore::default()),
            otps: Arc::new(MemoryOtpStore::new(clock.clone())),
            credentials: Arc::new(MemoryCredentialStore::new(clock)),
        }
    }

    /// MongoDB stores over `db`. `client` must be connected to a replica set,
    /// as multi-document writes run in transactions.
    pub fn mongodb(client: Client, db: &Database) -> Self {
        Self {
            elections: Arc::new(MongoElectionStore::new(client, db)),
            otps: Arc::new(MongoOtpStore::new(db)),
            credentials: Arc::new(MongoCredentialStore::new(db)),
        }
    }
}
