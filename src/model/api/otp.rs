use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Code, Mobile},
    db::Voter,
    mongodb::Id,
};

/// Request for a one-time code to be sent to a mobile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSendRequest {
    pub mobile: Mobile,
}

/// A code submitted for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpVerifyRequest {
    pub mobile: Mobile,
    pub otp: Code,
    /// Chooses between elections when the mobile is registered in several.
    #[serde(default)]
    pub election_id: Option<Id>,
}

/// What a session credential is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterScope {
    pub id: Id,
    pub constituency: String,
    pub election_id: Id,
}

impl From<&Voter> for VoterScope {
    fn from(voter: &Voter) -> Self {
        Self {
            id: voter.id,
            constituency: voter.constituency.clone(),
            election_id: voter.election_id,
        }
    }
}

/// A freshly minted session credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub voter: VoterScope,
}
