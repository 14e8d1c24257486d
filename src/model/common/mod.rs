//! Value types shared between storage and the API.

mod code;
pub use code::{Code, ParseError as CodeParseError, CODE_LENGTH};

mod mobile;
pub use mobile::{HmacSha256, Mobile, MobileKey};

mod status;
pub use status::{ElectionStatus, LifecycleAction};

use serde::{Deserialize, Serialize};

/// The kind of principal a bearer token speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rights {
    Voter,
    Admin,
}
