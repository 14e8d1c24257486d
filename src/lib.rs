#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{figment::Figment, Build, Rocket};

use crate::{
    clock::{Clock, SystemClock},
    config::{AwsFairing, ConfigFairing, DatabaseFairing, ServicesFairing},
    logging::LoggerFairing,
    sms::SmsSender,
    store::Stores,
};

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod service;
pub mod sms;
pub mod store;

#[cfg(test)]
mod test_support;

/// Build the server from `Rocket.toml` and the environment, backed by
/// MongoDB and Amazon SNS.
pub fn build() -> Rocket<Build> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(AwsFairing)
        .manage(clock)
        .attach(ServicesFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// Build the server over the given stores, SMS sender and clock instead of
/// connecting to external services.
pub fn build_with(
    figment: Figment,
    stores: Stores,
    sender: Arc<dyn SmsSender>,
    clock: Arc<dyn Clock>,
) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .manage(stores)
        .manage(sender)
        .manage(clock)
        .attach(ServicesFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}
