use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    task::{JoinError, JoinHandle},
    time::Duration,
};

use crate::clock::Clock;

/// A future that runs on its own at a given wall-clock time, unless it is
/// cancelled first.
pub struct ScheduledTask<T> {
    handle: JoinHandle<T>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Spawn `task` to run at `run_at` as read from `clock`, or straight away
    /// if that has passed.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>, clock: &dyn Clock) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let delay = delay_until(run_at, clock.now());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await
        });
        Self { handle }
    }

    /// Cancel the task. Returns true iff it had already run to completion.
    pub async fn cancel(self) -> bool {
        self.handle.abort();
        self.handle.await.is_ok()
    }
}

impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

/// Time from `now` until `at`; zero if `at` is in the past.
fn delay_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::time::Instant;

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::clock::ManualClock;

    #[rocket::async_test]
    async fn runs_at_its_time() {
        let clock = ManualClock::default();
        let started = Instant::now();
        let run_at = clock.now() + ChronoDuration::milliseconds(30);
        let task = ScheduledTask::new(async {}, run_at, &clock);
        task.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[rocket::async_test]
    async fn past_time_runs_immediately() {
        let clock = ManualClock::default();
        let run_at = clock.now() - ChronoDuration::days(1);
        let task = ScheduledTask::new(async { 7 }, run_at, &clock);
        assert_eq!(7, task.await.unwrap());
    }

    #[rocket::async_test]
    async fn delay_is_measured_on_the_given_clock() {
        // The clock says the run time is already behind us, whatever the
        // system time is.
        let clock = ManualClock::new(Utc::now() + ChronoDuration::days(365));
        let run_at = Utc::now() + ChronoDuration::hours(1);
        let task = ScheduledTask::new(async { 7 }, run_at, &clock);
        let result = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert_eq!(7, result.unwrap().unwrap());
    }

    #[test]
    fn delay_never_negative() {
        let now = Utc::now();
        assert_eq!(Duration::ZERO, delay_until(now - ChronoDuration::seconds(1), now));
        assert_eq!(
            Duration::from_secs(90),
            delay_until(now + ChronoDuration::seconds(90), now)
        );
    }

    #[rocket::async_test]
    async fn cancelled_task_never_runs() {
        let clock = ManualClock::default();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = ScheduledTask::new(
            async move { flag.store(true, Ordering::SeqCst) },
            clock.now() + ChronoDuration::milliseconds(20),
            &clock,
        );

        assert!(!task.cancel().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
