use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// One recorded ballot.
///
/// There is no voter field, and none may be added: nothing stored anywhere
/// links a vote back to the voter who cast it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub candidate_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl Vote {
    pub fn new(election_id: Id, candidate_id: Id, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            election_id,
            candidate_id,
            timestamp,
        }
    }
}
