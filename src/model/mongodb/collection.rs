use std::ops::Deref;
use std::time::Duration;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{Candidate, Election, OtpRecord, SessionRecord, Vote, Voter};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}

impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

impl MongoCollection for Voter {
    const NAME: &'static str = "voters";
}

impl MongoCollection for Vote {
    const NAME: &'static str = "votes";
}

impl MongoCollection for OtpRecord {
    const NAME: &'static str = "otps";
}

impl MongoCollection for SessionRecord {
    const NAME: &'static str = "sessions";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();
    let expire_on_date = IndexOptions::builder()
        .expire_after(Duration::from_secs(0))
        .build();

    // Voter collection: one registration per mobile per election, and fast
    // lookup by mobile during sign-in.
    let voter_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "mobile_key": 1})
        .options(unique.clone())
        .build();
    let mobile_index = IndexModel::builder()
        .keys(doc! {"mobile_key": 1})
        .build();
    Coll::<Voter>::from_db(db)
        .create_indexes([voter_index, mobile_index], None)
        .await?;

    // Candidate collection.
    let candidate_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "constituency": 1})
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(candidate_index, None)
        .await?;

    // Vote collection.
    let vote_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "candidate_id": 1})
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // OTP and session collections are TTL stores.
    let otp_index = IndexModel::builder()
        .keys(doc! {"expire_at": 1})
        .options(expire_on_date.clone())
        .build();
    Coll::<OtpRecord>::from_db(db)
        .create_index(otp_index, None)
        .await?;
    let session_index = IndexModel::builder()
        .keys(doc! {"expire_at": 1})
        .options(expire_on_date)
        .build();
    Coll::<SessionRecord>::from_db(db)
        .create_index(session_index, None)
        .await?;

    Ok(())
}
