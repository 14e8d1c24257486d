use std::sync::Arc;
use std::time::Duration;

use aws_sdk_sns::Client as SnsClient;
use log::{debug, warn};
use rocket::tokio;
use thiserror::Error;

use crate::{
    error::{Error, Result},
    model::common::Mobile,
};

/// A single failed delivery attempt.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DispatchError(pub String);

/// Something that can deliver a text message to a mobile number.
#[rocket::async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &Mobile, body: &str) -> std::result::Result<(), DispatchError>;
}

/// Delivers messages through Amazon SNS.
pub struct SnsSender {
    client: SnsClient,
}

impl SnsSender {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }
}

#[rocket::async_trait]
impl SmsSender for SnsSender {
    async fn send(&self, to: &Mobile, body: &str) -> std::result::Result<(), DispatchError> {
        self.client
            .publish()
            .phone_number(to.e164())
            .message(body)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| DispatchError(e.to_string()))
    }
}

/// Wraps another sender, retrying failed deliveries with exponential backoff.
#[derive(Clone)]
pub struct RetryingSender {
    inner: Arc<dyn SmsSender>,
    attempts: u32,
    backoff: Duration,
}

impl RetryingSender {
    /// `attempts` is the total number of tries, so at least one is always made.
    pub fn new(inner: Arc<dyn SmsSender>, attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Deliver `body` to `to`, or report [`Error::DispatchFailed`] once every
    /// attempt has failed.
    pub async fn send(&self, to: &Mobile, body: &str) -> Result<()> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.inner.send(to, body).await {
                Ok(()) => {
                    debug!("Sent SMS to {} on attempt {attempt}", to.masked());
                    return Ok(());
                }
                Err(e) if attempt >= self.attempts => {
                    warn!(
                        "Giving up on SMS to {} after {attempt} attempts: {e}",
                        to.masked()
                    );
                    return Err(Error::DispatchFailed(e.0));
                }
                Err(e) => {
                    warn!(
                        "SMS to {} failed on attempt {attempt}, retrying in {delay:?}: {e}",
                        to.masked()
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}
