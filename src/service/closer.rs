use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use log::{debug, error, info, trace, warn};
use rocket::{
    futures::future::{BoxFuture, FutureExt},
    tokio::sync::Mutex,
};

use crate::{
    clock::Clock,
    error::Result,
    model::{common::LifecycleAction, db::Election, mongodb::Id},
    scheduled_task::ScheduledTask,
    store::{ElectionStore, Transition},
};

/// How long a failed closer waits before it tries again.
const RETRY_INTERVAL_SECONDS: i64 = 60;

type TaskMap = HashMap<Id, ScheduledTask<Result<()>>>;

/// Tasks that end each active election at its configured end date.
#[derive(Clone)]
pub struct ElectionClosers {
    elections: Arc<dyn ElectionStore>,
    clock: Arc<dyn Clock>,
    tasks: Arc<Mutex<TaskMap>>,
}

impl ElectionClosers {
    pub fn new(elections: Arc<dyn ElectionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            elections,
            clock,
            tasks: Default::default(),
        }
    }

    /// Does the given election have a closer scheduled?
    pub async fn has_closer(&self, election_id: Id) -> bool {
        self.tasks.lock().await.contains_key(&election_id)
    }

    /// Schedule a closer for `election` at its end date, replacing any
    /// earlier one.
    pub async fn schedule(&self, election: &Election) {
        let closer = Self::closer(
            election.id,
            self.elections.clone(),
            self.clock.clone(),
            self.tasks.clone(),
        );
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.remove(&election.id) {
            previous.cancel().await;
        }
        let task = ScheduledTask::new(closer, election.end_date, self.clock.as_ref());
        tasks.insert(election.id, task);
        debug!("Election {} will close at {}", election.id, election.end_date);
    }

    /// Drop the closer for the given election, if any.
    pub async fn cancel(&self, election_id: Id) {
        let task = self.tasks.lock().await.remove(&election_id);
        if let Some(task) = task {
            task.cancel().await;
            trace!("Cancelled closer for election {election_id}");
        }
    }

    /// Recursive, hence boxed.
    fn closer(
        election_id: Id,
        elections: Arc<dyn ElectionStore>,
        clock: Arc<dyn Clock>,
        tasks: Arc<Mutex<TaskMap>>,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            let result = elections.transition(election_id, LifecycleAction::End).await;
            match result {
                Ok(transition) => {
                    tasks.lock().await.remove(&election_id);
                    match transition {
                        Transition::Applied(status) => {
                            info!("Election {election_id} reached its end date and is now {status}")
                        }
                        Transition::Refused(status) => {
                            debug!("Closer for election {election_id} found it {status}, nothing to do")
                        }
                        Transition::Missing => {
                            debug!("Closer for election {election_id} found it deleted")
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    error!("Closer for election {election_id} failed: {e}");
                    let retry = Self::closer(
                        election_id,
                        elections.clone(),
                        clock.clone(),
                        tasks.clone(),
                    );
                    let retry_at = clock.now() + Duration::seconds(RETRY_INTERVAL_SECONDS);
                    let task = ScheduledTask::new(retry, retry_at, clock.as_ref());
                    tasks.lock().await.insert(election_id, task);
                    warn!("Failed closer will be retried in {RETRY_INTERVAL_SECONDS} seconds");
                    Err(e)
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use rocket::tokio;

    use super::*;
    use crate::{model::common::ElectionStatus, test_support::Harness};

    fn closers(harness: &Harness) -> ElectionClosers {
        ElectionClosers::new(harness.stores.elections.clone(), harness.clock.clone())
    }

    #[rocket::async_test]
    async fn closes_at_end_date() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        harness.advance(&mut election, ElectionStatus::Active).await;
        election.end_date = harness.clock.now() + Duration::milliseconds(30);
        let closers = closers(&harness);

        closers.schedule(&election).await;
        assert!(closers.has_closer(election.id).await);
        tokio::time::sleep(StdDuration::from_millis(200)).await;

        let stored = harness.stores.elections.election(election.id).await.unwrap().unwrap();
        assert_eq!(ElectionStatus::Completed, stored.status);
        assert!(!closers.has_closer(election.id).await);
    }

    #[rocket::async_test]
    async fn end_date_is_read_against_the_injected_clock() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        harness.advance(&mut election, ElectionStatus::Active).await;
        // Far ahead of the system time, but already past on the manual clock.
        election.end_date = harness.clock.now() + Duration::days(30);
        harness.clock.advance(Duration::days(31));

        closers(&harness).schedule(&election).await;
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        let stored = harness.stores.elections.election(election.id).await.unwrap().unwrap();
        assert_eq!(ElectionStatus::Completed, stored.status);
    }

    #[rocket::async_test]
    async fn cancelled_closer_leaves_election_open() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        harness.advance(&mut election, ElectionStatus::Active).await;
        election.end_date = harness.clock.now() + Duration::milliseconds(30);
        let closers = closers(&harness);

        closers.schedule(&election).await;
        closers.cancel(election.id).await;
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        let stored = harness.stores.elections.election(election.id).await.unwrap().unwrap();
        assert_eq!(ElectionStatus::Active, stored.status);
    }

    #[rocket::async_test]
    async fn closer_never_moves_an_inactive_election() {
        let harness = Harness::new();
        let mut election = harness.seed_election().await;
        election.end_date = harness.clock.now();
        let closers = closers(&harness);

        closers.schedule(&election).await;
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        let stored = harness.stores.elections.election(election.id).await.unwrap().unwrap();
        assert_eq!(ElectionStatus::Inactive, stored.status);
        assert!(!closers.has_closer(election.id).await);
    }
}
