use std::sync::Arc;

use chrono::Duration;
use log::{debug, error, info, warn};

use crate::{
    clock::Clock,
    config::Config,
    error::{Error, Result},
    model::{
        common::{Code, Mobile, MobileKey},
        db::{OtpRecord, Voter},
        mongodb::Id,
    },
    sms::RetryingSender,
    store::{ElectionStore, OtpStore, Stores},
};

/// Issues, dispatches and verifies one-time codes.
#[derive(Clone)]
pub struct OtpGateway {
    otps: Arc<dyn OtpStore>,
    elections: Arc<dyn ElectionStore>,
    sender: RetryingSender,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_attempts: u32,
    resend_interval: Duration,
    hmac_secret: Arc<[u8]>,
}

impl OtpGateway {
    pub fn new(
        stores: &Stores,
        sender: RetryingSender,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            otps: stores.otps.clone(),
            elections: stores.elections.clone(),
            sender,
            clock,
            ttl: config.otp_ttl(),
            max_attempts: config.otp_max_attempts(),
            resend_interval: config.otp_resend_interval(),
            hmac_secret: config.hmac_secret().into(),
        }
    }

    /// Issue a fresh code for `mobile`, replacing any earlier one, and text it.
    pub async fn send_otp(&self, mobile: &Mobile) -> Result<()> {
        let key = mobile.key(&self.hmac_secret);
        if self.elections.voters_by_mobile(&key).await?.is_empty() {
            debug!("OTP requested for unregistered mobile {}", mobile.masked());
            return Err(Error::UnknownVoter);
        }

        let now = self.clock.now();
        if let Some(previous) = self.otps.current(&key).await? {
            let live = !previous.consumed && !previous.is_expired(now);
            if live && now < previous.issued_at + self.resend_interval {
                debug!("OTP resend to {} refused, too soon", mobile.masked());
                return Err(Error::OtpRateLimited);
            }
        }

        let code = Code::random();
        let record = OtpRecord::issue(key.clone(), &code, now, self.ttl, &self.hmac_secret);
        self.otps.issue(&record).await?;

        let message = format!(
            "Your voter verification code is {code}. It expires in {} minutes.",
            self.ttl.num_minutes()
        );
        if let Err(e) = self.sender.send(mobile, &message).await {
            // The code never arrived, so retire it and let the voter ask again at once.
            if let Err(retire_err) = self.otps.consume(&key, record.nonce).await {
                error!("Failed to retire undelivered OTP: {retire_err}");
            }
            return Err(e);
        }
        info!("Issued OTP to {}", mobile.masked());
        Ok(())
    }

    /// Check `code` against the live OTP for `mobile`. On success the OTP is
    /// spent and the matching voter is returned.
    ///
    /// With several voter rows under one mobile, `election_id` picks one;
    /// without it, a voter in an active election is preferred.
    pub async fn verify_otp(
        &self,
        mobile: &Mobile,
        code: &Code,
        election_id: Option<Id>,
    ) -> Result<Voter> {
        let key = mobile.key(&self.hmac_secret);
        let now = self.clock.now();

        let record = match self.otps.current(&key).await? {
            Some(record) if !record.consumed && !record.is_expired(now) => record,
            _ => {
                debug!("No live OTP for {}", mobile.masked());
                return Err(Error::OtpExpired);
            }
        };
        if record.failed_attempts >= self.max_attempts {
            return Err(Error::OtpRateLimited);
        }

        // Count the attempt before comparing, so concurrent guesses cannot
        // exceed the bound between them.
        if self
            .otps
            .claim_attempt(&key, record.nonce, self.max_attempts)
            .await?
            .is_none()
        {
            return Err(match self.otps.current(&key).await? {
                Some(current) if current.nonce == record.nonce && !current.consumed => {
                    Error::OtpRateLimited
                }
                _ => Error::OtpExpired,
            });
        }

        if !record.code_matches(code, &self.hmac_secret) {
            warn!("Wrong OTP submitted for {}", mobile.masked());
            return Err(Error::OtpMismatch);
        }

        let voter = self.resolve_voter(&key, election_id).await?;
        if !self.otps.consume(&key, record.nonce).await? {
            // Spent by a concurrent verification, or replaced by a resend.
            return Err(Error::OtpExpired);
        }
        debug!("OTP verified for {}", mobile.masked());
        Ok(voter)
    }

    async fn resolve_voter(&self, key: &MobileKey, election_id: Option<Id>) -> Result<Voter> {
        let mut voters = self.elections.voters_by_mobile(key).await?;
        if let Some(election_id) = election_id {
            voters.retain(|voter| voter.election_id == election_id);
        }
        if voters.len() > 1 {
            for (i, voter) in voters.iter().enumerate() {
                let active = self
                    .elections
                    .election(voter.election_id)
                    .await?
                    .map_or(false, |election| election.status.accepts_votes());
                if active {
                    return Ok(voters.swap_remove(i));
                }
            }
        }
        voters.into_iter().next().ok_or(Error::UnknownVoter)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::common::ElectionStatus;
    use crate::test_support::Harness;

    async fn harness_with_voter() -> (Harness, Voter) {
        let harness = Harness::new();
        let election = harness.seed_election().await;
        let voter = harness.seed_voter(&election, "Grace", Mobile::example()).await;
        (harness, voter)
    }

    #[rocket::async_test]
    async fn correct_code_verifies_once() {
        let (harness, voter) = harness_with_voter().await;
        let gateway = harness.gateway();

        gateway.send_otp(&Mobile::example()).await.unwrap();
        let code = harness.outbox.last_code(&Mobile::example()).unwrap();

        let verified = gateway
            .verify_otp(&Mobile::example(), &code, None)
            .await
            .unwrap();
        assert_eq!(voter.id, verified.id);

        let again = gateway.verify_otp(&Mobile::example(), &code, None).await;
        assert!(matches!(again, Err(Error::OtpExpired)));
    }

    #[rocket::async_test]
    async fn unregistered_mobile_gets_nothing() {
        let (harness, _) = harness_with_voter().await;

        let result = harness.gateway().send_otp(&Mobile::example2()).await;

        assert!(matches!(result, Err(Error::UnknownVoter)));
        assert!(harness.outbox.messages().is_empty());
    }

    #[rocket::async_test]
    async fn expired_code_never_verifies() {
        let (harness, _) = harness_with_voter().await;
        let gateway = harness.gateway();
        gateway.send_otp(&Mobile::example()).await.unwrap();
        let code = harness.outbox.last_code(&Mobile::example()).unwrap();

        harness.clock.advance(Duration::minutes(5));

        let result = gateway.verify_otp(&Mobile::example(), &code, None).await;
        assert!(matches!(result, Err(Error::OtpExpired)));
    }

    #[rocket::async_test]
    async fn reissue_invalidates_earlier_code() {
        let (harness, _) = harness_with_voter().await;
        let gateway = harness.gateway();
        gateway.send_otp(&Mobile::example()).await.unwrap();
        let first = harness.outbox.last_code(&Mobile::example()).unwrap();

        harness.clock.advance(Duration::seconds(31));
        gateway.send_otp(&Mobile::example()).await.unwrap();
        let second = harness.outbox.last_code(&Mobile::example()).unwrap();

        if first != second {
            let result = gateway.verify_otp(&Mobile::example(), &first, None).await;
            assert!(matches!(result, Err(Error::OtpMismatch)));
        }
        gateway
            .verify_otp(&Mobile::example(), &second, None)
            .await
            .unwrap();
    }

    #[rocket::async_test]
    async fn resend_too_soon_is_rate_limited() {
        let (harness, _) = harness_with_voter().await;
        let gateway = harness.gateway();
        gateway.send_otp(&Mobile::example()).await.unwrap();

        let result = gateway.send_otp(&Mobile::example()).await;

        assert!(matches!(result, Err(Error::OtpRateLimited)));
        assert_eq!(1, harness.outbox.messages().len());
    }

    #[rocket::async_test]
    async fn guessing_is_bounded() {
        let (harness, _) = harness_with_voter().await;
        let gateway = harness.gateway();
        gateway.send_otp(&Mobile::example()).await.unwrap();
        let code = harness.outbox.last_code(&Mobile::example()).unwrap();
        let wrong = harness.wrong_code(&code);

        for _ in 0..5 {
            let result = gateway.verify_otp(&Mobile::example(), &wrong, None).await;
            assert!(matches!(result, Err(Error::OtpMismatch)));
        }
        // Locked out now, even with the right code.
        let result = gateway.verify_otp(&Mobile::example(), &code, None).await;
        assert!(matches!(result, Err(Error::OtpRateLimited)));
    }

    #[rocket::async_test]
    async fn undelivered_code_is_retired() {
        let (harness, _) = harness_with_voter().await;
        let gateway = harness.gateway();
        harness.outbox.fail_next(3);

        let result = gateway.send_otp(&Mobile::example()).await;
        assert!(matches!(result, Err(Error::DispatchFailed(_))));

        // The voter may ask again straight away.
        gateway.send_otp(&Mobile::example()).await.unwrap();
        assert_eq!(1, harness.outbox.messages().len());
    }

    #[rocket::async_test]
    async fn election_id_selects_between_registrations() {
        let harness = Harness::new();
        let mut first = harness.seed_election().await;
        let second = harness.seed_election().await;
        harness.seed_voter(&first, "Grace", Mobile::example()).await;
        let wanted = harness.seed_voter(&second, "Grace", Mobile::example()).await;
        harness.advance(&mut first, ElectionStatus::Active).await;
        let gateway = harness.gateway();

        gateway.send_otp(&Mobile::example()).await.unwrap();
        let code = harness.outbox.last_code(&Mobile::example()).unwrap();
        let verified = gateway
            .verify_otp(&Mobile::example(), &code, Some(second.id))
            .await
            .unwrap();

        assert_eq!(wanted.id, verified.id);
    }

    #[rocket::async_test]
    async fn active_election_preferred_without_election_id() {
        let harness = Harness::new();
        let inactive = harness.seed_election().await;
        let mut active = harness.seed_election().await;
        harness.seed_voter(&inactive, "Grace", Mobile::example()).await;
        let wanted = harness.seed_voter(&active, "Grace", Mobile::example()).await;
        harness.advance(&mut active, ElectionStatus::Active).await;
        let gateway = harness.gateway();

        gateway.send_otp(&Mobile::example()).await.unwrap();
        let code = harness.outbox.last_code(&Mobile::example()).unwrap();
        let verified = gateway
            .verify_otp(&Mobile::example(), &code, None)
            .await
            .unwrap();

        assert_eq!(wanted.id, verified.id);
    }
}
