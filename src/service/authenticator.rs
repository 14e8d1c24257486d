use std::sync::Arc;

use chrono::Duration;
use log::{debug, info};

use crate::{
    clock::Clock,
    config::Config,
    error::{Error, Result},
    model::{
        api::{
            auth::SessionCredential,
            otp::{AccessGrant, VoterScope},
        },
        common::Mobile,
        db::{SessionRecord, Voter},
    },
    store::{CredentialStore, ElectionStore, Stores},
};

/// Turns a verified OTP into a single-use session credential, and checks
/// those credentials when they come back.
#[derive(Clone)]
pub struct VoterAuthenticator {
    elections: Arc<dyn ElectionStore>,
    credentials: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    jwt_secret: Arc<[u8]>,
    hmac_secret: Arc<[u8]>,
}

impl VoterAuthenticator {
    pub fn new(stores: &Stores, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            elections: stores.elections.clone(),
            credentials: stores.credentials.clone(),
            clock,
            ttl: config.auth_ttl(),
            jwt_secret: config.jwt_secret().into(),
            hmac_secret: config.hmac_secret().into(),
        }
    }

    /// Mint a credential for `voter`, who has just proven control of `mobile`.
    pub async fn authenticate(&self, mobile: &Mobile, voter: &Voter) -> Result<AccessGrant> {
        if voter.mobile_key != mobile.key(&self.hmac_secret) {
            return Err(Error::UnknownVoter);
        }
        // Judge against the stored row, not the caller's copy.
        let voter = self
            .elections
            .voter(voter.id)
            .await?
            .ok_or(Error::UnknownVoter)?;
        if voter.has_voted {
            debug!("Refused credential: voter has already voted");
            return Err(Error::AlreadyVoted);
        }
        let active = self
            .elections
            .election(voter.election_id)
            .await?
            .map_or(false, |election| election.status.accepts_votes());
        if !active {
            return Err(Error::ElectionNotActive);
        }

        let credential = SessionCredential::new(&voter, self.clock.now(), self.ttl);
        let access_token = credential.encode(&self.jwt_secret)?;
        self.credentials
            .register(&SessionRecord {
                jti: credential.jti,
                expire_at: credential.expire_at,
            })
            .await?;
        info!("Issued session credential for election {}", voter.election_id);

        Ok(AccessGrant {
            access_token,
            expires_at: credential.expire_at,
            voter: VoterScope::from(&voter),
        })
    }

    /// Check a presented credential's signature, expiry and single-use marker
    /// at this moment. Nothing about a credential is cached between calls.
    pub async fn validate(&self, token: &str) -> Result<SessionCredential> {
        let credential = SessionCredential::decode(token, &self.jwt_secret)?;
        let now = self.clock.now();
        if credential.is_expired(now) {
            return Err(Error::TokenExpired);
        }
        if !self.credentials.is_live(credential.jti, now).await? {
            return Err(Error::TokenInvalid);
        }
        Ok(credential)
    }

    /// Validate the credential and spend it in one step. Of any number of
    /// concurrent presentations of one credential, exactly one gets it back;
    /// the rest, and every later one, fail with `TokenInvalid`.
    pub async fn spend(&self, token: &str) -> Result<SessionCredential> {
        let credential = self.validate(token).await?;
        if !self.credentials.revoke(credential.jti).await? {
            debug!("Credential was spent by a concurrent presentation");
            return Err(Error::TokenInvalid);
        }
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::common::ElectionStatus;
    use crate::test_support::Harness;

    #[rocket::async_test]
    async fn credential_scoped_to_voter() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        let voter = harness.seed_voter(&election, "Grace", Mobile::example()).await;
        harness.advance(&mut election, ElectionStatus::Active).await;
        let authenticator = harness.authenticator();

        let grant = authenticator
            .authenticate(&Mobile::example(), &voter)
            .await
            .unwrap();
        assert_eq!(VoterScope::from(&voter), grant.voter);

        let credential = authenticator.validate(&grant.access_token).await.unwrap();
        assert_eq!(voter.id, credential.voter_id);
        assert_eq!(election.id, credential.election_id);
        assert_eq!(election.constituency, credential.constituency);
    }

    #[rocket::async_test]
    async fn inactive_election_refused() {
        let harness = Harness::new();
        for status in [ElectionStatus::Inactive, ElectionStatus::Completed] {
            let mut election = harness.seed_election().await;
            let voter = harness.seed_voter(&election, "Grace", Mobile::example()).await;
            harness.advance(&mut election, status).await;
            let result = harness
                .authenticator()
                .authenticate(&Mobile::example(), &voter)
                .await;
            assert!(matches!(result, Err(Error::ElectionNotActive)));
        }
    }

    #[rocket::async_test]
    async fn voted_voter_refused() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        let candidate = harness.seed_candidate(&election, "Ada").await;
        let voter = harness.seed_voter(&election, "Grace", Mobile::example()).await;
        harness.advance(&mut election, ElectionStatus::Active).await;
        let grant = harness.login(&Mobile::example(), &voter).await;
        harness
            .ledger()
            .cast_vote(&grant.access_token, election.id, candidate.id)
            .await
            .unwrap();

        let result = harness
            .authenticator()
            .authenticate(&Mobile::example(), &voter)
            .await;
        assert!(matches!(result, Err(Error::AlreadyVoted)));
    }

    #[rocket::async_test]
    async fn other_mobile_refused() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        let voter = harness.seed_voter(&election, "Grace", Mobile::example()).await;
        harness.advance(&mut election, ElectionStatus::Active).await;

        let result = harness
            .authenticator()
            .authenticate(&Mobile::example2(), &voter)
            .await;
        assert!(matches!(result, Err(Error::UnknownVoter)));
    }

    #[rocket::async_test]
    async fn credential_expires_on_wall_clock() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        let voter = harness.seed_voter(&election, "Grace", Mobile::example()).await;
        harness.advance(&mut election, ElectionStatus::Active).await;
        let authenticator = harness.authenticator();
        let grant = authenticator
            .authenticate(&Mobile::example(), &voter)
            .await
            .unwrap();

        harness.clock.advance(Duration::minutes(9));
        authenticator.validate(&grant.access_token).await.unwrap();

        harness.clock.advance(Duration::minutes(1));
        let result = authenticator.validate(&grant.access_token).await;
        assert!(matches!(result, Err(Error::TokenExpired)));
    }

    #[rocket::async_test]
    async fn spent_credential_is_dead() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        let voter = harness.seed_voter(&election, "Grace", Mobile::example()).await;
        harness.advance(&mut election, ElectionStatus::Active).await;
        let authenticator = harness.authenticator();
        let grant = authenticator
            .authenticate(&Mobile::example(), &voter)
            .await
            .unwrap();

        let credential = authenticator.spend(&grant.access_token).await.unwrap();
        assert_eq!(voter.id, credential.voter_id);

        let again = authenticator.spend(&grant.access_token).await;
        assert!(matches!(again, Err(Error::TokenInvalid)));
        let result = authenticator.validate(&grant.access_token).await;
        assert!(matches!(result, Err(Error::TokenInvalid)));
    }
}
