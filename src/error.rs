use argon2::Error as Argon2Error;
use jsonwebtoken::errors::Error as JwtError;
use log::{debug, error, warn};
use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::common::{ElectionStatus, LifecycleAction};

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the core can report. The first group are expected,
/// typed outcomes of voter and admin requests; the last group are
/// infrastructure faults.
#[derive(Debug, Error)]
pub enum Error {
    #[error("the one-time code has expired or is no longer valid")]
    OtpExpired,
    #[error("the one-time code does not match")]
    OtpMismatch,
    #[error("too many attempts; request a new code later")]
    OtpRateLimited,
    #[error("the code could not be delivered: {0}")]
    DispatchFailed(String),
    #[error("no registered voter matches")]
    UnknownVoter,
    #[error("this voter has already voted")]
    AlreadyVoted,
    #[error("the election is not accepting votes")]
    ElectionNotActive,
    #[error("the candidate is not standing in the voter's election and constituency")]
    InvalidCandidate,
    #[error("the session credential has expired")]
    TokenExpired,
    #[error("the session credential is invalid or already used")]
    TokenInvalid,
    #[error("cannot {action} an election that is {from}")]
    InvalidTransition {
        from: ElectionStatus,
        action: LifecycleAction,
    },
    #[error("the roll of an election that is {0} cannot be changed")]
    RollLocked(ElectionStatus),
    #[error("per-candidate results are sealed until the election is completed")]
    ResultsSealed,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// The HTTP status this outcome is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::OtpExpired | Self::OtpMismatch => Status::Unauthorized,
            Self::OtpRateLimited => Status::TooManyRequests,
            Self::DispatchFailed(_) => Status::BadGateway,
            Self::UnknownVoter | Self::NotFound(_) => Status::NotFound,
            Self::AlreadyVoted
            | Self::ElectionNotActive
            | Self::InvalidTransition { .. }
            | Self::RollLocked(_) => Status::Conflict,
            Self::InvalidCandidate => Status::UnprocessableEntity,
            Self::TokenExpired | Self::TokenInvalid | Self::Unauthorized(_) => {
                Status::Unauthorized
            }
            Self::ResultsSealed => Status::Forbidden,
            Self::BadRequest(_) => Status::BadRequest,
            Self::Db(_) | Self::Jwt(_) | Self::Argon2(_) => Status::InternalServerError,
        }
    }

    /// Stable machine-readable name for the outcome.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OtpExpired => "OtpExpired",
            Self::OtpMismatch => "OtpMismatch",
            Self::OtpRateLimited => "OtpRateLimited",
            Self::DispatchFailed(_) => "DispatchFailed",
            Self::UnknownVoter => "UnknownVoter",
            Self::AlreadyVoted => "AlreadyVoted",
            Self::ElectionNotActive => "ElectionNotActive",
            Self::InvalidCandidate => "InvalidCandidate",
            Self::TokenExpired => "TokenExpired",
            Self::TokenInvalid => "TokenInvalid",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::RollLocked(_) => "RollLocked",
            Self::ResultsSealed => "ResultsSealed",
            Self::BadRequest(_) => "BadRequest",
            Self::Unauthorized(_) => "Unauthorized",
            Self::NotFound(_) => "NotFound",
            Self::Db(_) | Self::Jwt(_) | Self::Argon2(_) => "Internal",
        }
    }
}

/// JSON body sent alongside every error status.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let message = match status.class() {
            StatusClass::ServerError => {
                error!("{self}");
                "internal error".to_string()
            }
            _ => {
                match self {
                    Self::DispatchFailed(_) | Self::OtpRateLimited => warn!("{self}"),
                    _ => debug!("{self}"),
                }
                self.to_string()
            }
        };
        let body = ErrorBody {
            error: self.code(),
            message,
        };
        (status, Json(body)).respond_to(req)
    }
}
