//! Shared fixtures for unit and HTTP tests: in-process stores, a manual
//! clock, and an SMS sender that records instead of sending.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rocket::{
    figment::Figment,
    http::{ContentType, Header, Status},
    local::asynchronous::Client,
    serde::json::serde_json::json,
};

use crate::{
    clock::ManualClock,
    config::Config,
    model::{
        api::otp::AccessGrant,
        common::{Code, ElectionStatus, LifecycleAction, Mobile, CODE_LENGTH},
        db::{Candidate, Election, Voter},
    },
    service::{ElectionLifecycle, OtpGateway, TallyEngine, VoteLedger, VoterAuthenticator},
    sms::{DispatchError, RetryingSender, SmsSender},
    store::{RollEdit, Stores, Transition},
};

pub type TestClock = Arc<ManualClock>;
pub type Outbox = Arc<RecordingSender>;
/// `Authorization` header for the configured admin.
pub type AdminAuth = Header<'static>;

pub const HMAC_SECRET: &str = "test hmac secret";
pub const ADMIN_USERNAME: &str = "returning-officer";
pub const ADMIN_PASSWORD: &str = "correct horse battery staple";

/// An [`SmsSender`] that keeps every delivered message, and can be told to
/// fail a number of upcoming deliveries.
#[derive(Debug, Default)]
pub struct RecordingSender {
    state: Mutex<Recorded>,
}

#[derive(Debug, Default)]
struct Recorded {
    messages: Vec<(Mobile, String)>,
    attempts: usize,
    failures_left: usize,
}

impl RecordingSender {
    /// Make the next `n` deliveries fail.
    pub fn fail_next(&self, n: usize) {
        self.state().failures_left = n;
    }

    /// Deliveries attempted, whether or not they failed.
    pub fn attempts(&self) -> usize {
        self.state().attempts
    }

    pub fn messages(&self) -> Vec<(Mobile, String)> {
        self.state().messages.clone()
    }

    /// The code in the latest message delivered to `mobile`.
    pub fn last_code(&self, mobile: &Mobile) -> Option<Code> {
        self.state()
            .messages
            .iter()
            .rev()
            .find(|(to, _)| to == mobile)
            .and_then(|(_, body)| {
                body.split(|c: char| !c.is_ascii_digit())
                    .find(|run| run.len() == CODE_LENGTH)
                    .and_then(|run| run.parse().ok())
            })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[rocket::async_trait]
impl SmsSender for RecordingSender {
    async fn send(&self, to: &Mobile, body: &str) -> Result<(), DispatchError> {
        let mut state = self.state();
        state.attempts += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(DispatchError("carrier unavailable".to_string()));
        }
        state.messages.push((to.clone(), body.to_string()));
        Ok(())
    }
}

pub fn init_logging() {
    log4rs_test_utils::test_logging::init_logging_once_for(["evote_backend"], None, None);
}

fn admin_password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        argon2::hash_encoded(
            ADMIN_PASSWORD.as_bytes(),
            b"evote-test-salt",
            &argon2::Config::default(),
        )
        .unwrap()
    })
}

/// Application config for tests. Automatic closing is off so that elections
/// only end when a test ends them.
pub fn test_figment() -> Figment {
    Figment::from(rocket::Config::debug_default())
        .merge(("log_level", "off"))
        .merge(("otp_ttl", 300))
        .merge(("otp_max_attempts", 5))
        .merge(("otp_resend_interval", 30))
        .merge(("auth_ttl", 600))
        .merge(("admin_ttl", 3600))
        .merge(("sms_retries", 3))
        .merge(("sms_backoff_ms", 1))
        .merge(("auto_close", false))
        .merge(("jwt_secret", "test jwt secret"))
        .merge(("hmac_secret", HMAC_SECRET))
        .merge(("admin_username", ADMIN_USERNAME))
        .merge(("admin_password_hash", admin_password_hash()))
}

pub fn test_config() -> Config {
    test_figment().extract().unwrap()
}

/// A fresh INACTIVE election. Seed its roll, then [`advance`] it.
pub async fn seed_election(stores: &Stores) -> Election {
    let election = Election::example();
    stores.elections.insert_election(&election).await.unwrap();
    election
}

pub async fn seed_candidate(stores: &Stores, election: &Election, name: &str) -> Candidate {
    let candidate = Candidate::new(
        election.id,
        name.to_string(),
        format!("{name} Party"),
        format!("symbols/{}.png", name.to_lowercase()),
        election.constituency.clone(),
    );
    assert_eq!(
        RollEdit::Applied,
        stores.elections.insert_candidate(&candidate).await.unwrap()
    );
    candidate
}

pub async fn seed_voter(stores: &Stores, election: &Election, name: &str, mobile: Mobile) -> Voter {
    let voter = Voter::new(
        election.id,
        name.to_string(),
        format!("NC-{}", name.to_uppercase()),
        mobile.key(HMAC_SECRET.as_bytes()),
        election.constituency.clone(),
    );
    assert_eq!(
        RollEdit::Applied,
        stores.elections.insert_voter(&voter).await.unwrap()
    );
    voter
}

/// Take `election` forward through the store until it reaches `target`.
pub async fn advance(stores: &Stores, election: &mut Election, target: ElectionStatus) {
    while election.status != target {
        let action = match election.status {
            ElectionStatus::Inactive => LifecycleAction::Start,
            ElectionStatus::Active => LifecycleAction::End,
            ElectionStatus::Completed => panic!("Cannot take a completed election to {target}"),
        };
        match stores.elections.transition(election.id, action).await.unwrap() {
            Transition::Applied(status) => election.status = status,
            other => panic!("{action} on election {} gave {other:?}", election.id),
        }
    }
}

/// The core services over in-process stores, for unit tests.
pub struct Harness {
    pub stores: Stores,
    pub clock: TestClock,
    pub outbox: Outbox,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        init_logging();
        let clock: TestClock = Arc::new(ManualClock::default());
        Self {
            stores: Stores::in_memory(clock.clone()),
            clock,
            outbox: Arc::default(),
            config: test_config(),
        }
    }

    pub fn gateway(&self) -> OtpGateway {
        let sender = RetryingSender::new(
            self.outbox.clone(),
            self.config.sms_retries(),
            self.config.sms_backoff(),
        );
        OtpGateway::new(&self.stores, sender, self.clock.clone(), &self.config)
    }

    pub fn authenticator(&self) -> VoterAuthenticator {
        VoterAuthenticator::new(&self.stores, self.clock.clone(), &self.config)
    }

    pub fn ledger(&self) -> VoteLedger {
        VoteLedger::new(&self.stores, self.authenticator(), self.clock.clone())
    }

    pub fn lifecycle(&self) -> ElectionLifecycle {
        ElectionLifecycle::new(&self.stores, None, &self.config)
    }

    pub fn tally(&self) -> TallyEngine {
        TallyEngine::new(&self.stores)
    }

    pub async fn seed_election(&self) -> Election {
        seed_election(&self.stores).await
    }

    pub async fn advance(&self, election: &mut Election, target: ElectionStatus) {
        advance(&self.stores, election, target).await
    }

    pub async fn seed_candidate(&self, election: &Election, name: &str) -> Candidate {
        seed_candidate(&self.stores, election, name).await
    }

    pub async fn seed_voter(&self, election: &Election, name: &str, mobile: Mobile) -> Voter {
        seed_voter(&self.stores, election, name, mobile).await
    }

    /// A code guaranteed to differ from `code`.
    pub fn wrong_code(&self, code: &Code) -> Code {
        let mut digits = code.to_string().into_bytes();
        digits[0] = if digits[0] == b'0' { b'1' } else { digits[0] - 1 };
        String::from_utf8(digits).unwrap().parse().unwrap()
    }

    /// Mint a credential for `voter` without going through an OTP.
    pub async fn login(&self, mobile: &Mobile, voter: &Voter) -> AccessGrant {
        self.authenticator()
            .authenticate(mobile, voter)
            .await
            .unwrap()
    }
}

/// A running application over fresh in-process stores.
pub struct TestEnv {
    pub client: Client,
    pub stores: Stores,
    pub clock: TestClock,
    pub outbox: Outbox,
}

impl TestEnv {
    pub async fn launch() -> Self {
        init_logging();
        let clock: TestClock = Arc::new(ManualClock::default());
        let outbox: Outbox = Arc::default();
        let stores = Stores::in_memory(clock.clone());
        let rocket = crate::build_with(
            test_figment(),
            stores.clone(),
            outbox.clone(),
            clock.clone(),
        );
        let client = Client::tracked(rocket).await.unwrap();
        Self {
            client,
            stores,
            clock,
            outbox,
        }
    }

    /// Log in as the configured admin.
    pub async fn admin_auth(&self) -> AdminAuth {
        let response = self
            .client
            .post(uri!(crate::api::auth::admin_login))
            .header(ContentType::JSON)
            .body(json!({ "username": ADMIN_USERNAME, "password": ADMIN_PASSWORD }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let grant: crate::model::api::admin::AdminGrant = response.into_json().await.unwrap();
        bearer(&grant.access_token)
    }
}

pub fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

/// Sign in over HTTP the way a voter would: request a code, read it off the
/// phone, submit it.
pub async fn voter_login(client: &Client, outbox: &Outbox, mobile: &Mobile) -> AccessGrant {
    let response = client
        .post(uri!(crate::api::otp::send))
        .header(ContentType::JSON)
        .body(json!({ "mobile": mobile }).to_string())
        .dispatch()
        .await;
    assert_eq!(Status::Accepted, response.status());

    let code = outbox.last_code(mobile).unwrap();
    let response = client
        .post(uri!(crate::api::otp::verify))
        .header(ContentType::JSON)
        .body(json!({ "mobile": mobile, "otp": code }).to_string())
        .dispatch()
        .await;
    assert_eq!(Status::Ok, response.status());
    response.into_json().await.unwrap()
}
