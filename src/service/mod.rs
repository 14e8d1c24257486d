//! The voting-integrity core. Each service is cheap to clone and holds only
//! shared handles, so Rocket manages one copy of each.

mod authenticator;
mod closer;
mod ledger;
mod lifecycle;
mod otp;
mod tally;

pub use authenticator::VoterAuthenticator;
pub use closer::ElectionClosers;
pub use ledger::VoteLedger;
pub use lifecycle::ElectionLifecycle;
pub use otp::OtpGateway;
pub use tally::TallyEngine;
