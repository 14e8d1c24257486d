use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;
use mongodb::{
    bson::{doc, from_document, DateTime as BsonDateTime, Document},
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, ReplaceOptions, ReturnDocument},
    Client, ClientSession, Database,
};
use rocket::{
    futures::{future::BoxFuture, FutureExt, TryStreamExt},
    tokio::time::sleep,
};
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    model::{
        common::{ElectionStatus, LifecycleAction, MobileKey},
        db::{Candidate, Election, OtpRecord, SessionRecord, Vote, Voter},
        mongodb::{is_duplicate_key_error, is_transient_transaction_error, Coll, Id},
    },
};

use super::{
    CredentialStore, ElectionStore, LedgerOutcome, OtpStore, Participation, RollEdit,
    Transition,
};

/// How long a transaction keeps being re-run after transient failures. Matches
/// the driver's own `with_transaction` convention.
const TRANSACTION_DEADLINE: Duration = Duration::from_secs(120);

/// Upper bound on the pause between re-runs, in milliseconds.
const MAX_BACKOFF_MS: u64 = 200;

/// Random pause before re-run `attempt`, growing with the attempt number.
fn backoff(attempt: u32) -> Duration {
    let ceiling = (5u64 << attempt.min(6)).min(MAX_BACKOFF_MS);
    Duration::from_millis(rand::thread_rng().gen_range(1..=ceiling))
}

/// The collections owned by an election.
#[derive(Clone)]
struct Collections {
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
    voters: Coll<Voter>,
    votes: Coll<Vote>,
}

impl Collections {
    /// Bump the election's roll revision, provided it is INACTIVE. The write
    /// makes the transaction conflict with a concurrent status change.
    /// Returns the refusal if the roll cannot be edited.
    async fn lock_roll(
        &self,
        session: &mut ClientSession,
        election_id: Id,
    ) -> Result<Option<RollEdit>> {
        let filter = doc! {
            "_id": election_id,
            "status": ElectionStatus::Inactive,
        };
        let update = doc! {
            "$inc": {"roll_revision": 1},
        };
        let result = self
            .elections
            .update_one_with_session(filter, update, None, session)
            .await?;
        if result.matched_count == 1 {
            return Ok(None);
        }
        let refusal = match self
            .elections
            .find_one_with_session(election_id.as_doc(), None, session)
            .await?
        {
            Some(election) => RollEdit::Locked(election.status),
            None => RollEdit::Missing,
        };
        Ok(Some(refusal))
    }

    async fn record_vote(
        &self,
        session: &mut ClientSession,
        voter_id: Id,
        vote: &Vote,
    ) -> Result<LedgerOutcome> {
        // Status, checked inside the same snapshot as the flag.
        let election = self
            .elections
            .find_one_with_session(vote.election_id.as_doc(), None, session)
            .await?;
        match election {
            Some(election) if election.status.accepts_votes() => {}
            _ => return Ok(LedgerOutcome::ElectionNotActive),
        }

        // Compare-and-set on exactly this voter's row. A concurrent cast for
        // the same voter writes the same document and so conflicts.
        let filter = doc! {
            "_id": voter_id,
            "election_id": vote.election_id,
            "has_voted": false,
        };
        let update = doc! {
            "$set": {"has_voted": true},
        };
        let result = self
            .voters
            .update_one_with_session(filter, update, None, session)
            .await?;
        if result.modified_count == 0 {
            let filter = doc! {
                "_id": voter_id,
                "election_id": vote.election_id,
            };
            let exists = self
                .voters
                .find_one_with_session(filter, None, session)
                .await?
                .is_some();
            return Ok(if exists {
                LedgerOutcome::AlreadyVoted
            } else {
                LedgerOutcome::UnknownVoter
            });
        }

        self.votes
            .insert_one_with_session(vote, None, session)
            .await?;
        Ok(LedgerOutcome::Recorded)
    }

    async fn delete_election(&self, session: &mut ClientSession, id: Id) -> Result<bool> {
        let result = self
            .elections
            .delete_one_with_session(id.as_doc(), None, session)
            .await?;
        if result.deleted_count == 0 {
            return Ok(false);
        }
        let owned = doc! {
            "election_id": id,
        };
        self.candidates
            .delete_many_with_session(owned.clone(), None, session)
            .await?;
        self.voters
            .delete_many_with_session(owned.clone(), None, session)
            .await?;
        self.votes
            .delete_many_with_session(owned, None, session)
            .await?;
        Ok(true)
    }
}

/// MongoDB [`ElectionStore`].
pub struct MongoElectionStore {
    client: Client,
    colls: Collections,
}

impl MongoElectionStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            colls: Collections {
                elections: Coll::from_db(db),
                candidates: Coll::from_db(db),
                voters: Coll::from_db(db),
                votes: Coll::from_db(db),
            },
        }
    }

    /// Run `op` inside a transaction, committing if it succeeds. The whole
    /// transaction is re-run, after a short random pause, while the server
    /// labels the failure transient and [`TRANSACTION_DEADLINE`] has not passed.
    async fn with_transaction<T, F>(&self, mut op: F) -> Result<T>
    where
        T: Send,
        F: for<'s> FnMut(&'s mut ClientSession) -> BoxFuture<'s, Result<T>> + Send,
    {
        let started = Instant::now();
        let mut attempt = 1;
        loop {
            let mut session = self.client.start_session(None).await?;
            session.start_transaction(None).await?;
            let result = match op(&mut session).await {
                Ok(value) => session
                    .commit_transaction()
                    .await
                    .map(|()| value)
                    .map_err(Error::from),
                Err(e) => {
                    // The server also aborts it once the session is dropped.
                    if let Err(abort_err) = session.abort_transaction().await {
                        debug!("Failed to abort transaction: {abort_err}");
                    }
                    Err(e)
                }
            };
            match result {
                Err(Error::Db(ref e))
                    if is_transient_transaction_error(e)
                        && started.elapsed() < TRANSACTION_DEADLINE =>
                {
                    debug!("Transaction attempt {attempt} hit a transient error, re-running: {e}");
                    sleep(backoff(attempt)).await;
                    attempt += 1;
                }
                Err(Error::Db(ref e)) if is_transient_transaction_error(e) => {
                    warn!("Transaction gave up after {attempt} attempts: {e}");
                    return result;
                }
                result => return result,
            }
        }
    }
}

/// One row of the vote count aggregation.
#[derive(Deserialize)]
struct VoteCount {
    #[serde(rename = "_id")]
    candidate_id: Id,
    count: i64,
}

#[rocket::async_trait]
impl ElectionStore for MongoElectionStore {
    async fn insert_election(&self, election: &Election) -> Result<()> {
        self.colls.elections.insert_one(election, None).await?;
        Ok(())
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        Ok(self.colls.elections.find_one(id.as_doc(), None).await?)
    }

    async fn elections_with_status(&self, status: ElectionStatus) -> Result<Vec<Election>> {
        let filter = doc! {
            "status": status,
        };
        let elections = self
            .colls
            .elections
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(elections)
    }

    async fn transition(&self, id: Id, action: LifecycleAction) -> Result<Transition> {
        // Statuses only move forward, so a lost race can repeat at most
        // once per remaining status.
        loop {
            let Some(election) = self.colls.elections.find_one(id.as_doc(), None).await? else {
                return Ok(Transition::Missing);
            };
            let from = election.status;
            let Some(to) = from.apply(action) else {
                return Ok(Transition::Refused(from));
            };
            let filter = doc! {
                "_id": id,
                "status": from,
            };
            let update = doc! {
                "$set": {"status": to},
            };
            let result = self.colls.elections.update_one(filter, update, None).await?;
            if result.modified_count == 1 {
                return Ok(Transition::Applied(to));
            }
            debug!("Election {id} left {from} before {action} applied, re-reading");
        }
    }

    async fn delete_election(&self, id: Id) -> Result<bool> {
        let colls = self.colls.clone();
        self.with_transaction(move |session| {
            let colls = colls.clone();
            async move { colls.delete_election(session, id).await }.boxed()
        })
        .await
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<RollEdit> {
        let colls = self.colls.clone();
        let candidate = candidate.clone();
        self.with_transaction(move |session| {
            let colls = colls.clone();
            let candidate = candidate.clone();
            async move {
                if let Some(refusal) = colls.lock_roll(session, candidate.election_id).await? {
                    return Ok(refusal);
                }
                colls
                    .candidates
                    .insert_one_with_session(&candidate, None, session)
                    .await?;
                Ok(RollEdit::Applied)
            }
            .boxed()
        })
        .await
    }

    async fn remove_candidate(&self, election_id: Id, candidate_id: Id) -> Result<RollEdit> {
        let colls = self.colls.clone();
        self.with_transaction(move |session| {
            let colls = colls.clone();
            async move {
                if let Some(refusal) = colls.lock_roll(session, election_id).await? {
                    return Ok(refusal);
                }
                let filter = doc! {
                    "_id": candidate_id,
                    "election_id": election_id,
                };
                let result = colls
                    .candidates
                    .delete_one_with_session(filter, None, session)
                    .await?;
                Ok(if result.deleted_count == 1 {
                    RollEdit::Applied
                } else {
                    RollEdit::Missing
                })
            }
            .boxed()
        })
        .await
    }

    async fn insert_voter(&self, voter: &Voter) -> Result<RollEdit> {
        let colls = self.colls.clone();
        let voter = voter.clone();
        let result = self
            .with_transaction(move |session| {
                let colls = colls.clone();
                let voter = voter.clone();
                async move {
                    if let Some(refusal) = colls.lock_roll(session, voter.election_id).await? {
                        return Ok(refusal);
                    }
                    let registered = doc! {
                        "election_id": voter.election_id,
                        "mobile_key": &voter.mobile_key,
                    };
                    if colls
                        .voters
                        .find_one_with_session(registered, None, session)
                        .await?
                        .is_some()
                    {
                        return Ok(RollEdit::Duplicate);
                    }
                    colls
                        .voters
                        .insert_one_with_session(&voter, None, session)
                        .await?;
                    Ok(RollEdit::Applied)
                }
                .boxed()
            })
            .await;
        match result {
            // Lost a race with a concurrent registration of the same mobile.
            Err(Error::Db(ref e)) if is_duplicate_key_error(e) => Ok(RollEdit::Duplicate),
            result => result,
        }
    }

    async fn remove_voter(&self, election_id: Id, voter_id: Id) -> Result<RollEdit> {
        let colls = self.colls.clone();
        self.with_transaction(move |session| {
            let colls = colls.clone();
            async move {
                if let Some(refusal) = colls.lock_roll(session, election_id).await? {
                    return Ok(refusal);
                }
                let filter = doc! {
                    "_id": voter_id,
                    "election_id": election_id,
                };
                let result = colls
                    .voters
                    .delete_one_with_session(filter, None, session)
                    .await?;
                Ok(if result.deleted_count == 1 {
                    RollEdit::Applied
                } else {
                    RollEdit::Missing
                })
            }
            .boxed()
        })
        .await
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.colls.candidates.find_one(id.as_doc(), None).await?)
    }

    async fn candidates(
        &self,
        election_id: Id,
        constituency: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        let mut filter = doc! {
            "election_id": election_id,
        };
        if let Some(constituency) = constituency {
            filter.insert("constituency", constituency);
        }
        let candidates = self
            .colls
            .candidates
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn voter(&self, id: Id) -> Result<Option<Voter>> {
        Ok(self.colls.voters.find_one(id.as_doc(), None).await?)
    }

    async fn voters_by_mobile(&self, mobile: &MobileKey) -> Result<Vec<Voter>> {
        let filter = doc! {
            "mobile_key": mobile,
        };
        let voters = self
            .colls
            .voters
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(voters)
    }

    async fn record_vote(&self, voter_id: Id, vote: &Vote) -> Result<LedgerOutcome> {
        let colls = self.colls.clone();
        let election_id = vote.election_id;
        let vote = vote.clone();
        let result = self
            .with_transaction(move |session| {
                let colls = colls.clone();
                let vote = vote.clone();
                async move { colls.record_vote(session, voter_id, &vote).await }.boxed()
            })
            .await;
        match result {
            // Still conflicting at the deadline: if a competing cast for this
            // voter committed, that is the outcome to report.
            Err(Error::Db(ref e)) if is_transient_transaction_error(e) => {
                let filter = doc! {
                    "_id": voter_id,
                    "election_id": election_id,
                    "has_voted": true,
                };
                if self.colls.voters.find_one(filter, None).await?.is_some() {
                    return Ok(LedgerOutcome::AlreadyVoted);
                }
                result
            }
            result => result,
        }
    }

    async fn participation(&self, election_id: Id) -> Result<Participation> {
        let owned = doc! {
            "election_id": election_id,
        };
        let voted = doc! {
            "election_id": election_id,
            "has_voted": true,
        };
        // Votes are counted before flags: every counted vote had its flag set first.
        let total_votes = self.colls.votes.count_documents(owned.clone(), None).await?;
        let voted_voters = self.colls.voters.count_documents(voted, None).await?;
        let total_voters = self.colls.voters.count_documents(owned, None).await?;
        Ok(Participation {
            total_voters,
            voted_voters,
            total_votes,
        })
    }

    async fn vote_counts(&self, election_id: Id) -> Result<HashMap<Id, u64>> {
        let pipeline = [
            doc! {
                "$match": {"election_id": election_id},
            },
            doc! {
                "$group": {"_id": "$candidate_id", "count": {"$sum": 1}},
            },
        ];
        let rows: Vec<Document> = self
            .colls
            .votes
            .aggregate(pipeline, None)
            .await?
            .try_collect()
            .await?;
        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let row: VoteCount = from_document(row).map_err(DbError::from)?;
            counts.insert(row.candidate_id, u64::try_from(row.count).unwrap_or(0));
        }
        Ok(counts)
    }
}

/// MongoDB [`OtpStore`]. Records are keyed by mobile and expire through a
/// TTL index on `expire_at`.
pub struct MongoOtpStore {
    otps: Coll<OtpRecord>,
}

impl MongoOtpStore {
    pub fn new(db: &Database) -> Self {
        Self {
            otps: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl OtpStore for MongoOtpStore {
    async fn issue(&self, record: &OtpRecord) -> Result<()> {
        let filter = doc! {
            "_id": &record.mobile,
        };
        let upsert = ReplaceOptions::builder().upsert(true).build();
        self.otps.replace_one(filter, record, upsert).await?;
        Ok(())
    }

    async fn current(&self, mobile: &MobileKey) -> Result<Option<OtpRecord>> {
        let filter = doc! {
            "_id": mobile,
        };
        Ok(self.otps.find_one(filter, None).await?)
    }

    async fn claim_attempt(
        &self,
        mobile: &MobileKey,
        nonce: Id,
        max: u32,
    ) -> Result<Option<u32>> {
        let filter = doc! {
            "_id": mobile,
            "nonce": nonce,
            "consumed": false,
            "failed_attempts": {"$lt": i64::from(max)},
        };
        let update = doc! {
            "$inc": {"failed_attempts": 1},
        };
        let after = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let claimed = self
            .otps
            .find_one_and_update(filter, update, after)
            .await?
            .map(|record| record.failed_attempts);
        Ok(claimed)
    }

    async fn consume(&self, mobile: &MobileKey, nonce: Id) -> Result<bool> {
        let filter = doc! {
            "_id": mobile,
            "nonce": nonce,
            "consumed": false,
        };
        let update = doc! {
            "$set": {"consumed": true},
        };
        let result = self.otps.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }
}

/// MongoDB [`CredentialStore`]. Records expire through a TTL index on
/// `expire_at`; liveness is still checked against the caller's clock.
pub struct MongoCredentialStore {
    sessions: Coll<SessionRecord>,
}

impl MongoCredentialStore {
    pub fn new(db: &Database) -> Self {
        Self {
            sessions: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl CredentialStore for MongoCredentialStore {
    async fn register(&self, session: &SessionRecord) -> Result<()> {
        self.sessions.insert_one(session, None).await?;
        Ok(())
    }

    async fn is_live(&self, jti: Id, now: DateTime<Utc>) -> Result<bool> {
        let filter = doc! {
            "_id": jti,
            "expire_at": {"$gt": BsonDateTime::from_chrono(now)},
        };
        Ok(self.sessions.find_one(filter, None).await?.is_some())
    }

    async fn revoke(&self, jti: Id) -> Result<bool> {
        let result = self.sessions.delete_one(jti.as_doc(), None).await?;
        Ok(result.deleted_count == 1)
    }
}
