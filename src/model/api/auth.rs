use std::sync::Arc;

use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error};
use rocket::{
    http::Status,
    outcome::try_outcome,
    request::{FromRequest, Outcome},
    Request,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    clock::Clock,
    config::Config,
    error::{Error, Result},
    model::{common::Rights, db::Voter, mongodb::Id},
};

const BEARER_PREFIX: &str = "Bearer ";

/// The raw token from an `Authorization: Bearer <token>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = req
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .filter(|token| !token.is_empty());
        match token {
            Some(token) => Outcome::Success(Self(token.to_string())),
            None => Outcome::Error((Status::Unauthorized, Error::TokenInvalid)),
        }
    }
}

/// Sign `claims` as an HS256 JWT.
fn encode_claims<T: Serialize>(claims: &T, secret: &[u8]) -> Result<String> {
    Ok(jsonwebtoken::encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret),
    )?)
}

/// Check the signature of `token` and extract its claims. Expiry is left to
/// the caller, who judges it against the injected clock.
fn decode_claims<T: DeserializeOwned>(token: &str, secret: &[u8]) -> Option<T> {
    let mut validation = Validation::default();
    validation.validate_exp = false;
    match jsonwebtoken::decode::<T>(token, &DecodingKey::from_secret(secret), &validation) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            debug!("Rejected bearer token: {e}");
            None
        }
    }
}

/// A voter's session credential: permission to attempt one vote, in one
/// election and constituency, for a short time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    #[serde(rename = "sub")]
    pub voter_id: Id,
    #[serde(rename = "eid")]
    pub election_id: Id,
    #[serde(rename = "cst")]
    pub constituency: String,
    #[serde(rename = "iat", with = "ts_seconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "exp", with = "ts_seconds")]
    pub expire_at: DateTime<Utc>,
    /// Identifies the server-side record whose removal makes this single-use.
    pub jti: Id,
    #[serde(rename = "rgt")]
    pub rights: Rights,
}

impl SessionCredential {
    pub fn new(voter: &Voter, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            voter_id: voter.id,
            election_id: voter.election_id,
            constituency: voter.constituency.clone(),
            issued_at: now,
            expire_at: now + ttl,
            jti: Id::new(),
            rights: Rights::Voter,
        }
    }

    pub fn encode(&self, secret: &[u8]) -> Result<String> {
        encode_claims(self, secret)
    }

    /// Verify the signature and extract the credential. Anything that is not
    /// a well-formed voter credential signed with `secret` is `TokenInvalid`.
    pub fn decode(token: &str, secret: &[u8]) -> Result<Self> {
        decode_claims::<Self>(token, secret)
            .filter(|credential| credential.rights == Rights::Voter)
            .ok_or(Error::TokenInvalid)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }
}

/// A logged-in admin, proven by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminToken {
    #[serde(rename = "sub")]
    pub username: String,
    #[serde(rename = "iat", with = "ts_seconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "exp", with = "ts_seconds")]
    pub expire_at: DateTime<Utc>,
    #[serde(rename = "rgt")]
    pub rights: Rights,
}

impl AdminToken {
    pub fn new(username: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            username,
            issued_at: now,
            expire_at: now + ttl,
            rights: Rights::Admin,
        }
    }

    pub fn encode(&self, secret: &[u8]) -> Result<String> {
        encode_claims(self, secret)
    }

    /// Verify `token` as an unexpired admin token for the configured admin.
    pub fn verify(token: &str, config: &Config, now: DateTime<Utc>) -> Result<Self> {
        let claims = decode_claims::<Self>(token, config.jwt_secret())
            .filter(|claims| claims.rights == Rights::Admin)
            .ok_or_else(|| Error::Unauthorized("not an admin token".to_string()))?;
        if now >= claims.expire_at {
            return Err(Error::Unauthorized("admin token has expired".to_string()));
        }
        if claims.username != config.admin_username() {
            return Err(Error::Unauthorized("unknown admin".to_string()));
        }
        Ok(claims)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let bearer = try_outcome!(req.guard::<BearerToken>().await.map_error(|(status, _)| {
            (status, Error::Unauthorized("missing admin token".to_string()))
        }));

        let rocket = req.rocket();
        let (Some(config), Some(clock)) = (
            rocket.state::<Config>(),
            rocket.state::<Arc<dyn Clock>>(),
        ) else {
            error!("Config and clock must be managed to check admin tokens");
            return Outcome::Error((
                Status::InternalServerError,
                Error::Unauthorized("server is misconfigured".to_string()),
            ));
        };

        match Self::verify(&bearer.0, config, clock.now()) {
            Ok(token) => Outcome::Success(token),
            Err(e) => Outcome::Error((Status::Unauthorized, e)),
        }
    }
}
