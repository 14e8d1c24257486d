use std::sync::Arc;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_sns::{
    config::{Credentials, Region},
    Client as SnsClient,
};
use chrono::Duration;
use log::{error, info};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    clock::Clock,
    model::mongodb::ensure_indexes_exist,
    service::{
        ElectionClosers, ElectionLifecycle, OtpGateway, TallyEngine, VoteLedger,
        VoterAuthenticator,
    },
    sms::{RetryingSender, SmsSender, SnsSender},
    store::Stores,
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // non-secrets
    otp_ttl: u32,
    otp_max_attempts: u32,
    otp_resend_interval: u32,
    auth_ttl: u32,
    admin_ttl: u32,
    sms_retries: u32,
    sms_backoff_ms: u64,
    auto_close: bool,
    // secrets
    jwt_secret: String,
    hmac_secret: String,
    admin_username: String,
    admin_password_hash: String,
}

impl Config {
    /// Valid lifetime of an OTP.
    pub fn otp_ttl(&self) -> Duration {
        Duration::seconds(self.otp_ttl.into())
    }

    /// Failed verifications tolerated per OTP before it is locked.
    pub fn otp_max_attempts(&self) -> u32 {
        self.otp_max_attempts
    }

    /// Minimum gap between two OTPs sent to the same mobile.
    pub fn otp_resend_interval(&self) -> Duration {
        Duration::seconds(self.otp_resend_interval.into())
    }

    /// Valid lifetime of a voter session credential.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Valid lifetime of an admin token.
    pub fn admin_ttl(&self) -> Duration {
        Duration::seconds(self.admin_ttl.into())
    }

    /// Attempts made to dispatch one SMS before giving up.
    pub fn sms_retries(&self) -> u32 {
        self.sms_retries
    }

    /// Delay before the first SMS retry; doubled for each subsequent one.
    pub fn sms_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sms_backoff_ms)
    }

    /// End active elections automatically at their end date?
    pub fn auto_close(&self) -> bool {
        self.auto_close
    }

    /// Secret key used to sign JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key used to sign HMACs of mobile numbers and OTP codes.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }

    pub fn admin_username(&self) -> &str {
        &self.admin_username
    }

    /// Argon2 encoded hash of the admin password.
    pub fn admin_password_hash(&self) -> &str {
        &self.admin_password_hash
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// ensures the indexes exist, and places MongoDB-backed [`Stores`] into
/// managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(DATABASE_NAME);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to create database indexes: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        rocket = rocket.manage(Stores::mongodb(client, &db));
        Ok(rocket)
    }
}

/// Name of the database holding every collection.
const DATABASE_NAME: &str = "evote";

/// Configuration for the AWS connection.
#[derive(Deserialize)]
struct AwsConfig {
    // non-secrets
    aws_region: String,
    aws_access_key_id: String,
    // secrets
    aws_secret_access_key: String,
}

/// A fairing that loads the AWS config and places an SNS-backed
/// [`SmsSender`] into managed state.
pub struct AwsFairing;

#[rocket::async_trait]
impl Fairing for AwsFairing {
    fn info(&self) -> Info {
        Info {
            name: "AWS SNS",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<AwsConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load AWS config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        // Construct the connection.
        let aws_config = SdkConfig::builder()
            .region(Region::new(config.aws_region))
            .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                config.aws_access_key_id,
                config.aws_secret_access_key,
                None,
                None,
                "rocket config",
            )))
            .behavior_version(BehaviorVersion::latest())
            .build();
        let client = SnsClient::new(&aws_config);
        info!("Loaded Amazon SNS config");

        // Manage the state.
        let sender: Arc<dyn SmsSender> = Arc::new(SnsSender::new(client));
        rocket = rocket.manage(sender);
        Ok(rocket)
    }
}

/// A fairing that assembles the voting core from the managed [`Config`],
/// [`Stores`], [`SmsSender`] and [`Clock`], and places each service into
/// managed state. Closers are scheduled for elections that are already
/// active. This fairing must be attached after those that provide its
/// inputs.
pub struct ServicesFairing;

#[rocket::async_trait]
impl Fairing for ServicesFairing {
    fn info(&self) -> Info {
        Info {
            name: "Voting core",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (config, stores, sender, clock) = match (
            rocket.state::<Config>(),
            rocket.state::<Stores>(),
            rocket.state::<Arc<dyn SmsSender>>(),
            rocket.state::<Arc<dyn Clock>>(),
        ) {
            (Some(config), Some(stores), Some(sender), Some(clock)) => {
                (config.clone(), stores.clone(), sender.clone(), clock.clone())
            }
            _ => {
                error!("Config, stores, SMS sender and clock must be managed before the voting core");
                return Err(rocket);
            }
        };

        let sender = RetryingSender::new(sender, config.sms_retries(), config.sms_backoff());
        let gateway = OtpGateway::new(&stores, sender, clock.clone(), &config);
        let authenticator = VoterAuthenticator::new(&stores, clock.clone(), &config);
        let ledger = VoteLedger::new(&stores, authenticator.clone(), clock.clone());
        let closers = config
            .auto_close()
            .then(|| ElectionClosers::new(stores.elections.clone(), clock.clone()));
        let lifecycle = ElectionLifecycle::new(&stores, closers, &config);
        let tally = TallyEngine::new(&stores);

        info!("Scheduling election closers...");
        if let Err(e) = lifecycle.schedule_active().await {
            error!("Failed to schedule election closers: {e}");
            return Err(rocket);
        }
        info!("...voting core ready!");

        Ok(rocket
            .manage(gateway)
            .manage(authenticator)
            .manage(ledger)
            .manage(lifecycle)
            .manage(tally))
    }
}
