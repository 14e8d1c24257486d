//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings, datetimes in MongoDB's own format.

mod candidate;
pub use candidate::Candidate;

mod election;
pub use election::{Election, ElectionCore};

mod otp;
pub use otp::OtpRecord;

mod session;
pub use session::SessionRecord;

mod vote;
pub use vote::Vote;

mod voter;
pub use voter::{Voter, VoterCore};
