use std::sync::Arc;

use crate::{
    error::{Error, Result},
    model::{
        api::results::{Aggregate, Breakdown, CandidateTally, ElectionResults, Winner},
        db::Election,
        mongodb::Id,
    },
    store::{ElectionStore, Stores},
};

/// Aggregates the ledger into results, revealing only what the election's
/// status allows.
#[derive(Clone)]
pub struct TallyEngine {
    elections: Arc<dyn ElectionStore>,
}

impl TallyEngine {
    pub fn new(stores: &Stores) -> Self {
        Self {
            elections: stores.elections.clone(),
        }
    }

    /// Participation figures. Available in every state.
    pub async fn compute_aggregate(&self, election_id: Id) -> Result<Aggregate> {
        self.election(election_id).await?;
        self.aggregate(election_id).await
    }

    /// Per-candidate counts and the winner. Sealed until the election is COMPLETED.
    pub async fn compute_breakdown(&self, election_id: Id) -> Result<Breakdown> {
        let election = self.election(election_id).await?;
        self.breakdown(&election).await
    }

    /// Everything the election's status allows to be seen.
    pub async fn results(&self, election_id: Id) -> Result<ElectionResults> {
        let election = self.election(election_id).await?;
        let aggregate = self.aggregate(election_id).await?;
        let (breakdown, winner) = if election.status.results_visible() {
            let Breakdown { tallies, winner } = self.breakdown(&election).await?;
            (Some(tallies), Some(winner))
        } else {
            (None, None)
        };
        Ok(ElectionResults {
            election_id,
            status: election.status,
            aggregate,
            breakdown,
            winner,
        })
    }

    async fn election(&self, id: Id) -> Result<Election> {
        self.elections
            .election(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election {id}")))
    }

    async fn aggregate(&self, election_id: Id) -> Result<Aggregate> {
        let participation = self.elections.participation(election_id).await?;
        Ok(Aggregate {
            total_voters: participation.total_voters,
            voted_voters: participation.voted_voters,
            total_votes: participation.total_votes,
            turnout_percentage: turnout(participation.voted_voters, participation.total_voters),
        })
    }

    async fn breakdown(&self, election: &Election) -> Result<Breakdown> {
        if !election.status.results_visible() {
            return Err(Error::ResultsSealed);
        }
        let counts = self.elections.vote_counts(election.id).await?;
        let mut tallies: Vec<_> = self
            .elections
            .candidates(election.id, None)
            .await?
            .into_iter()
            .map(|candidate| CandidateTally {
                votes: counts.get(&candidate.id).copied().unwrap_or(0),
                candidate_id: candidate.id,
                name: candidate.name,
                party: candidate.party,
            })
            .collect();
        tallies.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.name.cmp(&b.name)));
        let winner = decide(&tallies);
        Ok(Breakdown { tallies, winner })
    }
}

/// Voted over registered, as a percentage rounded to two places.
fn turnout(voted: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (voted as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// The sole top scorer wins. Equal top counts are a tie and nobody wins.
fn decide(sorted: &[CandidateTally]) -> Winner {
    let top = match sorted.first() {
        Some(first) if first.votes > 0 => first.votes,
        _ => return Winner::NoVotes,
    };
    let leaders: Vec<_> = sorted.iter().take_while(|t| t.votes == top).collect();
    match leaders.as_slice() {
        [only] => Winner::Decided {
            candidate_id: only.candidate_id,
            name: only.name.clone(),
            votes: top,
        },
        _ => Winner::Tie {
            candidate_ids: leaders.iter().map(|t| t.candidate_id).collect(),
            votes: top,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::common::{ElectionStatus, Mobile};
    use crate::test_support::Harness;

    fn tally(name: &str, votes: u64) -> CandidateTally {
        CandidateTally {
            candidate_id: Id::new(),
            name: name.to_string(),
            party: String::new(),
            votes,
        }
    }

    #[test]
    fn turnout_rounds_to_two_places() {
        assert_eq!(66.67, turnout(2, 3));
        assert_eq!(100.0, turnout(3, 3));
        assert_eq!(0.0, turnout(0, 0));
    }

    #[test]
    fn winner_decisions() {
        assert_eq!(Winner::NoVotes, decide(&[]));
        assert_eq!(Winner::NoVotes, decide(&[tally("A", 0), tally("B", 0)]));

        let sorted = [tally("A", 3), tally("B", 1)];
        assert_eq!(
            Winner::Decided {
                candidate_id: sorted[0].candidate_id,
                name: "A".to_string(),
                votes: 3
            },
            decide(&sorted)
        );

        let sorted = [tally("A", 2), tally("B", 2), tally("C", 1)];
        assert_eq!(
            Winner::Tie {
                candidate_ids: vec![sorted[0].candidate_id, sorted[1].candidate_id],
                votes: 2
            },
            decide(&sorted)
        );
    }

    #[rocket::async_test]
    async fn breakdown_sealed_until_completed() {
        let harness = Harness::new();
        let tally = harness.tally();
        for status in [ElectionStatus::Inactive, ElectionStatus::Active] {
            let mut election = harness.seed_election().await;
            harness.seed_candidate(&election, "Ada").await;
            harness.advance(&mut election, status).await;

            assert!(matches!(
                tally.compute_breakdown(election.id).await,
                Err(Error::ResultsSealed)
            ));
            let results = tally.results(election.id).await.unwrap();
            assert_eq!(None, results.breakdown);
            assert_eq!(None, results.winner);
        }
    }

    #[rocket::async_test]
    async fn unknown_election() {
        let harness = Harness::new();
        let result = harness.tally().compute_aggregate(Id::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    /// Two of three voters split their votes; the third tries twice.
    #[rocket::async_test]
    async fn split_election_is_a_tie() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        let x = harness.seed_candidate(&election, "X").await;
        let y = harness.seed_candidate(&election, "Y").await;
        let a = harness.seed_voter(&election, "A", Mobile::example()).await;
        let b = harness.seed_voter(&election, "B", Mobile::example2()).await;
        harness.seed_voter(&election, "C", Mobile::example3()).await;
        harness.advance(&mut election, ElectionStatus::Active).await;
        let ledger = harness.ledger();
        let tally = harness.tally();

        let grant = harness.login(&Mobile::example(), &a).await;
        ledger.cast_vote(&grant.access_token, election.id, x.id).await.unwrap();
        let grant = harness.login(&Mobile::example2(), &b).await;
        ledger.cast_vote(&grant.access_token, election.id, y.id).await.unwrap();

        let during = tally.results(election.id).await.unwrap();
        assert_eq!(2, during.aggregate.total_votes);
        assert!(during.breakdown.is_none());

        harness.lifecycle().end(election.id).await.unwrap();
        let results = tally.results(election.id).await.unwrap();

        assert_eq!(ElectionStatus::Completed, results.status);
        assert_eq!(
            Aggregate {
                total_voters: 3,
                voted_voters: 2,
                total_votes: 2,
                turnout_percentage: 66.67,
            },
            results.aggregate
        );
        let breakdown = results.breakdown.unwrap();
        assert_eq!(2, breakdown.len());
        assert!(breakdown.iter().all(|t| t.votes == 1));
        assert_eq!(
            Some(Winner::Tie {
                candidate_ids: vec![x.id, y.id],
                votes: 1
            }),
            results.winner
        );
    }
}
