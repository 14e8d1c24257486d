use std::sync::Arc;

use log::{debug, info};

use crate::{
    clock::Clock,
    error::{Error, Result},
    model::{
        api::auth::SessionCredential,
        db::{Candidate, Vote},
        mongodb::Id,
    },
    store::{ElectionStore, LedgerOutcome, Stores},
};

use super::VoterAuthenticator;

/// The exactly-once, anonymous vote-casting transaction.
///
/// Ballots are append-only. There is deliberately no way to update or
/// delete a vote through this type.
#[derive(Clone)]
pub struct VoteLedger {
    elections: Arc<dyn ElectionStore>,
    authenticator: VoterAuthenticator,
    clock: Arc<dyn Clock>,
}

impl VoteLedger {
    pub fn new(stores: &Stores, authenticator: VoterAuthenticator, clock: Arc<dyn Clock>) -> Self {
        Self {
            elections: stores.elections.clone(),
            authenticator,
            clock,
        }
    }

    /// Cast a vote for `candidate_id` with the credential `token`.
    ///
    /// The credential is claimed before anything else happens, so it is spent
    /// whatever the outcome and a replay never reaches the voter's flag.
    /// Distinct credentials for one voter are settled by the flag's
    /// compare-and-set instead. Never retried internally.
    pub async fn cast_vote(&self, token: &str, election_id: Id, candidate_id: Id) -> Result<()> {
        let credential = self.authenticator.spend(token).await?;
        self.cast(&credential, election_id, candidate_id).await
    }

    async fn cast(
        &self,
        credential: &SessionCredential,
        election_id: Id,
        candidate_id: Id,
    ) -> Result<()> {
        if election_id != credential.election_id {
            debug!("Credential presented for a different election");
            return Err(Error::TokenInvalid);
        }

        // Re-checked now, not trusted from authentication time.
        let active = self
            .elections
            .election(election_id)
            .await?
            .map_or(false, |election| election.status.accepts_votes());
        if !active {
            return Err(Error::ElectionNotActive);
        }

        self.eligible_candidate(credential, candidate_id).await?;

        let vote = Vote::new(election_id, candidate_id, self.clock.now());
        match self
            .elections
            .record_vote(credential.voter_id, &vote)
            .await?
        {
            LedgerOutcome::Recorded => {
                info!("Recorded a vote in election {election_id}");
                Ok(())
            }
            LedgerOutcome::AlreadyVoted => Err(Error::AlreadyVoted),
            LedgerOutcome::ElectionNotActive => Err(Error::ElectionNotActive),
            // The voter has left the roll since the credential was minted.
            LedgerOutcome::UnknownVoter => Err(Error::TokenInvalid),
        }
    }

    /// The candidate, if it stands in the credential's election and constituency.
    async fn eligible_candidate(
        &self,
        credential: &SessionCredential,
        candidate_id: Id,
    ) -> Result<Candidate> {
        self.elections
            .candidate(candidate_id)
            .await?
            .filter(|candidate| {
                candidate.election_id == credential.election_id
                    && candidate.constituency == credential.constituency
            })
            .ok_or(Error::InvalidCandidate)
    }

    /// The ballot paper for the credential's holder. Reading it does not
    /// spend the credential.
    pub async fn candidates(
        &self,
        token: &str,
        election_id: Id,
        constituency: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        let credential = self.authenticator.validate(token).await?;
        if election_id != credential.election_id {
            return Err(Error::TokenInvalid);
        }
        if constituency.map_or(false, |wanted| wanted != credential.constituency) {
            return Err(Error::BadRequest(
                "constituency does not match the credential".to_string(),
            ));
        }
        self.elections
            .candidates(election_id, Some(&credential.constituency))
            .await
    }
}
