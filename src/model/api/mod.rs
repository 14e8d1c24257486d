//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.
//! - Nothing that identifies a voter is ever placed next to a vote.

pub mod admin;
pub mod auth;
pub mod otp;
pub mod results;
pub mod vote;
