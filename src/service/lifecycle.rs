use std::sync::Arc;

use log::{debug, info};

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        api::admin::{CandidateSpec, ElectionSpec, VoterSpec},
        common::{ElectionStatus, LifecycleAction},
        db::{Candidate, Election, Voter},
        mongodb::Id,
    },
    store::{ElectionStore, RollEdit, Stores, Transition},
};

use super::ElectionClosers;

/// The election state machine, and the only writer of an election's roll.
#[derive(Clone)]
pub struct ElectionLifecycle {
    elections: Arc<dyn ElectionStore>,
    closers: Option<ElectionClosers>,
    hmac_secret: Arc<[u8]>,
}

impl ElectionLifecycle {
    /// Without `closers`, elections only end when told to.
    pub fn new(stores: &Stores, closers: Option<ElectionClosers>, config: &Config) -> Self {
        Self {
            elections: stores.elections.clone(),
            closers,
            hmac_secret: config.hmac_secret().into(),
        }
    }

    pub async fn create(&self, spec: ElectionSpec) -> Result<Election> {
        let name = spec.name.trim();
        let constituency = spec.constituency.trim();
        if name.is_empty() || constituency.is_empty() {
            return Err(Error::BadRequest(
                "name and constituency are required".to_string(),
            ));
        }
        if spec.end_date < spec.start_date {
            return Err(Error::BadRequest(
                "end date precedes start date".to_string(),
            ));
        }
        let election = Election::new(
            name.to_string(),
            constituency.to_string(),
            spec.start_date,
            spec.end_date,
        );
        self.elections.insert_election(&election).await?;
        info!("Created election {}", election.id);
        Ok(election)
    }

    pub async fn election(&self, id: Id) -> Result<Election> {
        self.elections
            .election(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election {id}")))
    }

    /// INACTIVE to ACTIVE. Freezes the roll and opens voting.
    pub async fn start(&self, id: Id) -> Result<Election> {
        let election = self.apply(id, LifecycleAction::Start).await?;
        if let Some(closers) = &self.closers {
            closers.schedule(&election).await;
        }
        Ok(election)
    }

    /// ACTIVE to COMPLETED. Voting closes for good and results unseal.
    pub async fn end(&self, id: Id) -> Result<Election> {
        let election = self.apply(id, LifecycleAction::End).await?;
        if let Some(closers) = &self.closers {
            closers.cancel(id).await;
        }
        Ok(election)
    }

    async fn apply(&self, id: Id, action: LifecycleAction) -> Result<Election> {
        let mut election = self.election(id).await?;
        match self.elections.transition(id, action).await? {
            Transition::Applied(to) => {
                info!("Election {id} is now {to}");
                election.status = to;
                Ok(election)
            }
            Transition::Refused(from) => {
                debug!("Election {id} is {from}, refusing {action}");
                Err(Error::InvalidTransition { from, action })
            }
            Transition::Missing => Err(Error::not_found(format!("Election {id}"))),
        }
    }

    /// Delete the election with its whole roll and every vote, in any state.
    pub async fn delete(&self, id: Id) -> Result<()> {
        if let Some(closers) = &self.closers {
            closers.cancel(id).await;
        }
        if !self.elections.delete_election(id).await? {
            return Err(Error::not_found(format!("Election {id}")));
        }
        info!("Deleted election {id}");
        Ok(())
    }

    pub async fn add_candidate(&self, election_id: Id, spec: CandidateSpec) -> Result<Candidate> {
        let election = self.election(election_id).await?;
        check_constituency(&election, &spec.constituency)?;
        let candidate = Candidate::new(
            election_id,
            spec.name,
            spec.party,
            spec.symbol,
            election.constituency.clone(),
        );
        roll_edit(self.elections.insert_candidate(&candidate).await?, "Candidate")?;
        info!("Added candidate {} to election {election_id}", candidate.id);
        Ok(candidate)
    }

    pub async fn remove_candidate(&self, election_id: Id, candidate_id: Id) -> Result<()> {
        roll_edit(
            self.elections
                .remove_candidate(election_id, candidate_id)
                .await?,
            "Candidate",
        )?;
        info!("Removed candidate {candidate_id} from election {election_id}");
        Ok(())
    }

    pub async fn add_voter(&self, election_id: Id, spec: VoterSpec) -> Result<Voter> {
        let election = self.election(election_id).await?;
        check_constituency(&election, &spec.constituency)?;
        let voter = Voter::new(
            election_id,
            spec.name,
            spec.voter_number,
            spec.mobile.key(&self.hmac_secret),
            election.constituency.clone(),
        );
        roll_edit(self.elections.insert_voter(&voter).await?, "Voter")?;
        info!("Registered voter {} for election {election_id}", voter.id);
        Ok(voter)
    }

    pub async fn remove_voter(&self, election_id: Id, voter_id: Id) -> Result<()> {
        roll_edit(
            self.elections.remove_voter(election_id, voter_id).await?,
            "Voter",
        )?;
        info!("Removed voter {voter_id} from election {election_id}");
        Ok(())
    }

    /// Schedule closers for every election that is already ACTIVE.
    pub async fn schedule_active(&self) -> Result<()> {
        if let Some(closers) = &self.closers {
            let active = self
                .elections
                .elections_with_status(ElectionStatus::Active)
                .await?;
            for election in &active {
                closers.schedule(election).await;
            }
            info!("Scheduled closers for {} active elections", active.len());
        }
        Ok(())
    }
}

fn check_constituency(election: &Election, constituency: &str) -> Result<()> {
    if constituency.trim() != election.constituency {
        return Err(Error::BadRequest(format!(
            "constituency must be {}",
            election.constituency
        )));
    }
    Ok(())
}

fn roll_edit(outcome: RollEdit, what: &str) -> Result<()> {
    match outcome {
        RollEdit::Applied => Ok(()),
        RollEdit::Locked(status) => Err(Error::RollLocked(status)),
        RollEdit::Missing => Err(Error::not_found(what)),
        RollEdit::Duplicate => Err(Error::BadRequest(
            "mobile already registered for this election".to_string(),
        )),
    }
}
