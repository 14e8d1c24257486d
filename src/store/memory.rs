use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::{
    clock::Clock,
    error::Result,
    model::{
        common::{ElectionStatus, LifecycleAction, MobileKey},
        db::{Candidate, Election, OtpRecord, SessionRecord, Vote, Voter},
        mongodb::Id,
    },
};

use super::{
    CredentialStore, ElectionStore, LedgerOutcome, OtpStore, Participation, RollEdit,
    Transition,
};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered voter. The stored row's own `has_voted` is ignored in
/// favour of the atomic flag, which is the only thing ever flipped.
struct VoterEntry {
    voter: Voter,
    has_voted: AtomicBool,
}

impl VoterEntry {
    fn new(voter: Voter) -> Self {
        let has_voted = AtomicBool::new(voter.has_voted);
        Self { voter, has_voted }
    }

    fn snapshot(&self) -> Voter {
        let mut voter = self.voter.clone();
        voter.has_voted = self.has_voted.load(Ordering::Acquire);
        voter
    }
}

/// An election and everything it owns.
///
/// Casting and roll edits hold the read side of `election` for their whole
/// critical section; status changes take the write side. A status change
/// therefore never interleaves with a cast or edit that has already passed
/// its status check.
struct ElectionEntry {
    election: RwLock<Election>,
    candidates: RwLock<Vec<Candidate>>,
    voters: RwLock<HashMap<Id, Arc<VoterEntry>>>,
    votes: Mutex<Vec<Vote>>,
}

impl ElectionEntry {
    fn new(election: Election) -> Self {
        Self {
            election: RwLock::new(election),
            candidates: Default::default(),
            voters: Default::default(),
            votes: Default::default(),
        }
    }
}

/// In-process [`ElectionStore`].
#[derive(Default)]
pub struct MemoryElectionStore {
    elections: RwLock<HashMap<Id, Arc<ElectionEntry>>>,
}

impl MemoryElectionStore {
    fn entry(&self, id: Id) -> Option<Arc<ElectionEntry>> {
        read(&self.elections).get(&id).cloned()
    }

    fn entries(&self) -> Vec<Arc<ElectionEntry>> {
        read(&self.elections).values().cloned().collect()
    }

    /// Run `edit` against an election's roll while holding its status steady.
    fn edit_roll(&self, election_id: Id, edit: impl FnOnce(&ElectionEntry) -> RollEdit) -> RollEdit {
        let Some(entry) = self.entry(election_id) else {
            return RollEdit::Missing;
        };
        let election = read(&entry.election);
        if !election.status.roll_editable() {
            return RollEdit::Locked(election.status);
        }
        edit(&entry)
    }
}

#[rocket::async_trait]
impl ElectionStore for MemoryElectionStore {
    async fn insert_election(&self, election: &Election) -> Result<()> {
        write(&self.elections).insert(election.id, Arc::new(ElectionEntry::new(election.clone())));
        Ok(())
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        Ok(self.entry(id).map(|entry| read(&entry.election).clone()))
    }

    async fn elections_with_status(&self, status: ElectionStatus) -> Result<Vec<Election>> {
        Ok(self
            .entries()
            .iter()
            .map(|entry| read(&entry.election).clone())
            .filter(|election| election.status == status)
            .collect())
    }

    async fn transition(&self, id: Id, action: LifecycleAction) -> Result<Transition> {
        let Some(entry) = self.entry(id) else {
            return Ok(Transition::Missing);
        };
        let mut election = write(&entry.election);
        Ok(match election.status.apply(action) {
            Some(to) => {
                election.status = to;
                Transition::Applied(to)
            }
            None => Transition::Refused(election.status),
        })
    }

    async fn delete_election(&self, id: Id) -> Result<bool> {
        Ok(write(&self.elections).remove(&id).is_some())
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<RollEdit> {
        Ok(self.edit_roll(candidate.election_id, |entry| {
            write(&entry.candidates).push(candidate.clone());
            RollEdit::Applied
        }))
    }

    async fn remove_candidate(&self, election_id: Id, candidate_id: Id) -> Result<RollEdit> {
        Ok(self.edit_roll(election_id, |entry| {
            let mut candidates = write(&entry.candidates);
            let before = candidates.len();
            candidates.retain(|c| c.id != candidate_id);
            if candidates.len() == before {
                RollEdit::Missing
            } else {
                RollEdit::Applied
            }
        }))
    }

    async fn insert_voter(&self, voter: &Voter) -> Result<RollEdit> {
        Ok(self.edit_roll(voter.election_id, |entry| {
            let mut voters = write(&entry.voters);
            if voters
                .values()
                .any(|v| v.voter.mobile_key == voter.mobile_key)
            {
                return RollEdit::Duplicate;
            }
            voters.insert(voter.id, Arc::new(VoterEntry::new(voter.clone())));
            RollEdit::Applied
        }))
    }

    async fn remove_voter(&self, election_id: Id, voter_id: Id) -> Result<RollEdit> {
        Ok(self.edit_roll(election_id, |entry| {
            match write(&entry.voters).remove(&voter_id) {
                Some(_) => RollEdit::Applied,
                None => RollEdit::Missing,
            }
        }))
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.entries().iter().find_map(|entry| {
            read(&entry.candidates)
                .iter()
                .find(|c| c.id == id)
                .cloned()
        }))
    }

    async fn candidates(
        &self,
        election_id: Id,
        constituency: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        let Some(entry) = self.entry(election_id) else {
            return Ok(Vec::new());
        };
        let candidates = read(&entry.candidates)
            .iter()
            .filter(|c| constituency.map_or(true, |wanted| c.constituency == wanted))
            .cloned()
            .collect();
        Ok(candidates)
    }

    async fn voter(&self, id: Id) -> Result<Option<Voter>> {
        Ok(self
            .entries()
            .iter()
            .find_map(|entry| read(&entry.voters).get(&id).map(|v| v.snapshot())))
    }

    async fn voters_by_mobile(&self, mobile: &MobileKey) -> Result<Vec<Voter>> {
        let mut found = Vec::new();
        for entry in self.entries() {
            found.extend(
                read(&entry.voters)
                    .values()
                    .filter(|v| &v.voter.mobile_key == mobile)
                    .map(|v| v.snapshot()),
            );
        }
        Ok(found)
    }

    async fn record_vote(&self, voter_id: Id, vote: &Vote) -> Result<LedgerOutcome> {
        let Some(entry) = self.entry(vote.election_id) else {
            return Ok(LedgerOutcome::ElectionNotActive);
        };
        // Held until the vote is pushed, so the election cannot end mid-cast.
        let election = read(&entry.election);
        if !election.status.accepts_votes() {
            return Ok(LedgerOutcome::ElectionNotActive);
        }
        let Some(voter) = read(&entry.voters).get(&voter_id).cloned() else {
            return Ok(LedgerOutcome::UnknownVoter);
        };
        if voter
            .has_voted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(LedgerOutcome::AlreadyVoted);
        }
        lock(&entry.votes).push(vote.clone());
        drop(election);
        Ok(LedgerOutcome::Recorded)
    }

    async fn participation(&self, election_id: Id) -> Result<Participation> {
        let Some(entry) = self.entry(election_id) else {
            return Ok(Participation::default());
        };
        // Votes are counted before flags: every counted vote had its flag set first.
        let total_votes = lock(&entry.votes).len() as u64;
        let voters = read(&entry.voters);
        let voted_voters = voters
            .values()
            .filter(|v| v.has_voted.load(Ordering::Acquire))
            .count() as u64;
        Ok(Participation {
            total_voters: voters.len() as u64,
            voted_voters,
            total_votes,
        })
    }

    async fn vote_counts(&self, election_id: Id) -> Result<HashMap<Id, u64>> {
        let mut counts = HashMap::new();
        if let Some(entry) = self.entry(election_id) {
            for vote in lock(&entry.votes).iter() {
                *counts.entry(vote.candidate_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

/// In-process [`OtpStore`]. Expired records are swept whenever a new one is issued.
pub struct MemoryOtpStore {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<MobileKey, OtpRecord>>,
}

impl MemoryOtpStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: Default::default(),
        }
    }
}

#[rocket::async_trait]
impl OtpStore for MemoryOtpStore {
    async fn issue(&self, record: &OtpRecord) -> Result<()> {
        let now = self.clock.now();
        let mut records = lock(&self.records);
        records.retain(|_, r| !r.is_expired(now));
        records.insert(record.mobile.clone(), record.clone());
        Ok(())
    }

    async fn current(&self, mobile: &MobileKey) -> Result<Option<OtpRecord>> {
        Ok(lock(&self.records).get(mobile).cloned())
    }

    async fn claim_attempt(
        &self,
        mobile: &MobileKey,
        nonce: Id,
        max: u32,
    ) -> Result<Option<u32>> {
        let mut records = lock(&self.records);
        let claimed = records
            .get_mut(mobile)
            .filter(|r| r.nonce == nonce && !r.consumed && r.failed_attempts < max)
            .map(|r| {
                r.failed_attempts += 1;
                r.failed_attempts
            });
        Ok(claimed)
    }

    async fn consume(&self, mobile: &MobileKey, nonce: Id) -> Result<bool> {
        let mut records = lock(&self.records);
        match records.get_mut(mobile) {
            Some(r) if r.nonce == nonce && !r.consumed => {
                r.consumed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-process [`CredentialStore`]. Expired credentials are swept whenever a
/// new one is registered.
pub struct MemoryCredentialStore {
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<Id, SessionRecord>>,
}

impl MemoryCredentialStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: Default::default(),
        }
    }
}

#[rocket::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn register(&self, session: &SessionRecord) -> Result<()> {
        let now = self.clock.now();
        let mut sessions = lock(&self.sessions);
        sessions.retain(|_, s| s.is_live(now));
        sessions.insert(session.jti, session.clone());
        Ok(())
    }

    async fn is_live(&self, jti: Id, now: DateTime<Utc>) -> Result<bool> {
        Ok(lock(&self.sessions)
            .get(&jti)
            .map_or(false, |s| s.is_live(now)))
    }

    async fn revoke(&self, jti: Id) -> Result<bool> {
        Ok(lock(&self.sessions).remove(&jti).is_some())
    }
}
