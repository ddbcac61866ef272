//! Condition polling for effects that only become visible after a delay.
//!
//! A condition is any closure returning a future of
//! `Result<(bool, Option<T>), E>`. `wait_for` evaluates it immediately, then
//! keeps re-evaluating it every `interval` until it reports success or
//! `max_wait` has elapsed. Running out of time is not an error: the outcome
//! carries `success = false` and the caller decides what that means.
//!
//! Conditions should report "not there yet" as `Ok((false, None))`. Any `Err`
//! they return aborts the wait and is handed back unchanged.

use crate::clock::Stopwatch;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Floor applied to `WaitOptions::interval`, so a zero interval does not
/// turn into a busy poll against the remote.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Receives one human readable progress line at a time.
pub type Logger = Arc<dyn Fn(&str) + Send + Sync>;

/// Default logger, forwards progress lines to `log::info!`.
pub fn log_logger() -> Logger {
    Arc::new(|line: &str| log::info!("{line}"))
}

#[derive(Clone)]
pub struct WaitOptions {
    pub max_wait: Duration,
    pub interval: Duration,
    pub logger: Logger,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(60),
            interval: Duration::from_secs(5),
            logger: log_logger(),
        }
    }
}

impl fmt::Debug for WaitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitOptions")
            .field("max_wait", &self.max_wait)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl WaitOptions {
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self {
            max_wait,
            interval,
            ..Default::default()
        }
    }

    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.logger = Arc::new(logger);
        self
    }

    fn log(&self, line: &str) {
        (self.logger)(line)
    }
}

/// Result of a finished wait.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome<T> {
    pub name: String,
    pub success: bool,
    /// Payload from the last evaluation.
    pub payload: Option<T>,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Error)]
#[error("wait_for '{name}' did not succeed after {attempts} attempts in {:.2} seconds", .elapsed.as_secs_f64())]
pub struct WaitTimeout {
    pub name: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> WaitOutcome<T> {
    pub fn into_pair(self) -> (bool, Option<T>) {
        (self.success, self.payload)
    }

    /// Turn a timed out wait into an error describing what was waited for.
    pub fn ensure(self) -> Result<Option<T>, WaitTimeout> {
        if self.success {
            Ok(self.payload)
        } else {
            Err(WaitTimeout {
                name: self.name,
                attempts: self.attempts,
                elapsed: self.elapsed,
            })
        }
    }
}

/// Poll `condition` until it succeeds or `options.max_wait` elapses.
///
/// The condition always runs once before any sleep. Between evaluations the
/// wait sleeps for `options.interval` (at least [`MIN_INTERVAL`]), shortened
/// to whatever is left of `max_wait`, so no evaluation starts after the
/// deadline. An evaluation in
/// flight when the deadline passes is never interrupted.
pub async fn wait_for<T, E, F, Fut>(
    name: &str,
    mut condition: F,
    options: &WaitOptions,
) -> Result<WaitOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(bool, Option<T>), E>>,
{
    options.log(&format!(
        "start wait_for '{name}', max_wait={}s",
        options.max_wait.as_secs_f64()
    ));

    let watch = Stopwatch::start();
    let (mut success, mut payload) = condition().await?;
    let mut attempts = 1;

    while !success && !watch.exceeded(options.max_wait) {
        let pause = options
            .interval
            .max(MIN_INTERVAL)
            .min(watch.remaining(options.max_wait));
        tokio::time::sleep(pause).await;

        (success, payload) = condition().await?;
        attempts += 1;
    }

    let elapsed = watch.elapsed();
    options.log(&format!(
        "wait_for '{name}' success={success} in {} seconds",
        elapsed.as_secs_f64()
    ));

    Ok(WaitOutcome {
        name: name.to_string(),
        success,
        payload,
        attempts,
        elapsed,
    })
}

/// `wait_for` for conditions without a payload.
pub async fn wait_until<E, F, Fut>(
    name: &str,
    mut condition: F,
    options: &WaitOptions,
) -> Result<WaitOutcome<()>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    wait_for(
        name,
        || {
            let check = condition();
            async move { check.await.map(|ready| (ready, None)) }
        },
        options,
    )
    .await
}
