use std::fmt::{self, Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// States in the Election lifecycle. Elections only ever move forward:
/// `Inactive -> Active -> Completed`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionStatus {
    /// Roll under construction by the admin; no votes accepted.
    Inactive,
    /// Roll frozen, votes accepted.
    Active,
    /// Terminal. Votes refused, per-candidate results visible.
    Completed,
}

/// An admin-triggered lifecycle step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Start,
    End,
}

impl ElectionStatus {
    /// The state reached by applying `action` in this state, if legal.
    pub fn apply(self, action: LifecycleAction) -> Option<ElectionStatus> {
        match (self, action) {
            (Self::Inactive, LifecycleAction::Start) => Some(Self::Active),
            (Self::Active, LifecycleAction::End) => Some(Self::Completed),
            (Self::Inactive, LifecycleAction::End)
            | (Self::Active, LifecycleAction::Start)
            | (Self::Completed, _) => None,
        }
    }

    /// May the admin add, edit or remove candidates and voters?
    pub fn roll_editable(self) -> bool {
        match self {
            Self::Inactive => true,
            Self::Active | Self::Completed => false,
        }
    }

    /// May ballots be cast?
    pub fn accepts_votes(self) -> bool {
        match self {
            Self::Active => true,
            Self::Inactive | Self::Completed => false,
        }
    }

    /// May per-candidate counts and the winner be revealed?
    pub fn results_visible(self) -> bool {
        match self {
            Self::Completed => true,
            Self::Inactive | Self::Active => false,
        }
    }
}

impl Display for ElectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "INACTIVE",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

impl Display for LifecycleAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::End => f.write_str("end"),
        }
    }
}

impl From<ElectionStatus> for Bson {
    fn from(status: ElectionStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
