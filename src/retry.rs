//! Bounded retries for flaky remote calls.
//!
//! A [`Retrier`] combines a [`RetryPolicy`] (how many attempts, how long to
//! wait between them) with a [`RetryPredicate`] (is this error worth another
//! attempt) and a [`RetryObserver`] (who hears about it). Success values are
//! returned untouched; after the last attempt the final error is returned
//! unchanged, never wrapped.

use crate::clock::Stopwatch;
use crate::error::Classify;
use crate::retry_policy::{RetryConfig, RetryPolicy};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Per call-site progress of a retried call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Evaluating,
    Waiting,
    DoneSuccess,
    DoneFailure,
}

/// Decides whether a failed attempt may be retried.
pub trait RetryPredicate<E: ?Sized>: Send + Sync {
    fn should_retry(&self, error: &E) -> bool;
}

/// Retries errors whose transient kind is accepted by the policy's
/// [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct TransientPredicate {
    config: RetryConfig,
}

impl TransientPredicate {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl<E: Classify + ?Sized> RetryPredicate<E> for TransientPredicate {
    fn should_retry(&self, error: &E) -> bool {
        error
            .transient_kind()
            .is_some_and(|kind| self.config.should_retry(kind))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E: ?Sized> RetryPredicate<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<E: ?Sized> RetryPredicate<E> for NeverRetry {
    fn should_retry(&self, _error: &E) -> bool {
        false
    }
}

/// Predicate backed by a closure, for error types without a [`Classify`] impl.
#[derive(Clone)]
pub struct ClosurePredicate<F> {
    predicate: F,
}

impl<F> ClosurePredicate<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<E, F> RetryPredicate<E> for ClosurePredicate<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }
}

/// A failed attempt as reported to observers.
pub struct FailedAttempt<'a> {
    pub name: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    pub error_type: &'a str,
    pub error: &'a dyn fmt::Display,
}

pub trait RetryObserver: Send + Sync {
    /// The attempt failed with a transient error and another one follows
    /// after `delay`.
    fn on_retry(&self, failure: &FailedAttempt<'_>, delay: Duration);

    /// The last allowed attempt failed.
    fn on_exhausted(&self, failure: &FailedAttempt<'_>);

    /// The attempt failed with an error the predicate rejected.
    fn on_fatal(&self, failure: &FailedAttempt<'_>);

    fn on_success(&self, name: &str, attempt: u32, elapsed: Duration) {
        let _ = (name, attempt, elapsed);
    }

    fn on_state(&self, name: &str, state: CallState) {
        let _ = (name, state);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl RetryObserver for NoOpObserver {
    fn on_retry(&self, _failure: &FailedAttempt<'_>, _delay: Duration) {}

    fn on_exhausted(&self, _failure: &FailedAttempt<'_>) {}

    fn on_fatal(&self, _failure: &FailedAttempt<'_>) {}
}

/// Reports retries through the `log` facade.
///
/// Retries are logged at warn level as
/// `[Retry #<k>/<max>] Retrying '<name>' due to <Type>: <message>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RetryObserver for LogObserver {
    fn on_retry(&self, failure: &FailedAttempt<'_>, delay: Duration) {
        log::warn!(
            "[Retry #{}/{}] Retrying '{}' due to {}: {}",
            failure.attempt,
            failure.max_attempts,
            failure.name,
            failure.error_type,
            failure.error
        );
        log::debug!("'{}' next attempt in {:.2}s", failure.name, delay.as_secs_f64());
    }

    fn on_exhausted(&self, failure: &FailedAttempt<'_>) {
        log::error!(
            "'{}' failed after {} attempts, giving up: {}: {}",
            failure.name,
            failure.attempt,
            failure.error_type,
            failure.error
        );
    }

    fn on_fatal(&self, failure: &FailedAttempt<'_>) {
        log::debug!(
            "'{}' failed on attempt {} with non-retryable {}: {}",
            failure.name,
            failure.attempt,
            failure.error_type,
            failure.error
        );
    }

    fn on_success(&self, name: &str, attempt: u32, elapsed: Duration) {
        if attempt > 1 {
            log::info!(
                "'{name}' succeeded on attempt {attempt} after {:.2}s",
                elapsed.as_secs_f64()
            );
        }
    }

    fn on_state(&self, name: &str, state: CallState) {
        log::trace!("'{name}' -> {state:?}");
    }
}

/// Counts observer callbacks; handy in tests.
#[derive(Debug, Default)]
pub struct StatsObserver {
    retries: AtomicU32,
    exhaustions: AtomicU32,
    fatals: AtomicU32,
    successes: AtomicU32,
    states: Mutex<Vec<CallState>>,
    messages: Mutex<Vec<String>>,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn exhaustions(&self) -> u32 {
        self.exhaustions.load(Ordering::SeqCst)
    }

    pub fn fatals(&self) -> u32 {
        self.fatals.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn states(&self) -> Vec<CallState> {
        self.states
            .lock()
            .map(|states| states.clone())
            .unwrap_or_default()
    }

    /// Retry lines in the same shape `LogObserver` writes them.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl RetryObserver for StatsObserver {
    fn on_retry(&self, failure: &FailedAttempt<'_>, _delay: Duration) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(format!(
                "[Retry #{}/{}] Retrying '{}' due to {}: {}",
                failure.attempt,
                failure.max_attempts,
                failure.name,
                failure.error_type,
                failure.error
            ));
        }
    }

    fn on_exhausted(&self, _failure: &FailedAttempt<'_>) {
        self.exhaustions.fetch_add(1, Ordering::SeqCst);
    }

    fn on_fatal(&self, _failure: &FailedAttempt<'_>) {
        self.fatals.fetch_add(1, Ordering::SeqCst);
    }

    fn on_success(&self, _name: &str, _attempt: u32, _elapsed: Duration) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_state(&self, _name: &str, state: CallState) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
    }
}

impl<T: RetryObserver + ?Sized> RetryObserver for Arc<T> {
    fn on_retry(&self, failure: &FailedAttempt<'_>, delay: Duration) {
        (**self).on_retry(failure, delay)
    }

    fn on_exhausted(&self, failure: &FailedAttempt<'_>) {
        (**self).on_exhausted(failure)
    }

    fn on_fatal(&self, failure: &FailedAttempt<'_>) {
        (**self).on_fatal(failure)
    }

    fn on_success(&self, name: &str, attempt: u32, elapsed: Duration) {
        (**self).on_success(name, attempt, elapsed)
    }

    fn on_state(&self, name: &str, state: CallState) {
        (**self).on_state(name, state)
    }
}

/// Last path segment of a type name, without generic arguments.
fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Runs operations under a retry policy.
#[derive(Debug, Clone)]
pub struct Retrier<P = TransientPredicate, O = LogObserver> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
}

impl Retrier<TransientPredicate, LogObserver> {
    /// Retries the transient kinds accepted by `policy.retry`, logging each
    /// retry.
    pub fn new(policy: RetryPolicy) -> Self {
        let predicate = TransientPredicate::new(policy.retry.clone());
        Self {
            policy,
            predicate,
            observer: LogObserver,
        }
    }
}

impl Default for Retrier<TransientPredicate, LogObserver> {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl<P, O> Retrier<P, O> {
    pub fn with_predicate<P2>(self, predicate: P2) -> Retrier<P2, O> {
        Retrier {
            policy: self.policy,
            predicate,
            observer: self.observer,
        }
    }

    pub fn with_observer<O2>(self, observer: O2) -> Retrier<P, O2> {
        Retrier {
            policy: self.policy,
            predicate: self.predicate,
            observer,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<P, O: RetryObserver> Retrier<P, O> {
    /// Invoke `op` until it succeeds, fails with an error the predicate
    /// rejects, or the policy's attempt bound is reached.
    pub async fn call<T, E, F, Fut>(&self, name: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: RetryPredicate<E>,
    {
        let max_attempts = self.policy.stop.max_attempts.max(1);
        let error_type = short_type_name::<E>();
        let watch = Stopwatch::start();
        let mut attempt = 1;

        self.observer.on_state(name, CallState::Pending);
        loop {
            self.observer.on_state(name, CallState::Evaluating);
            let err = match op().await {
                Ok(value) => {
                    self.observer.on_state(name, CallState::DoneSuccess);
                    self.observer.on_success(name, attempt, watch.elapsed());
                    return Ok(value);
                }
                Err(err) => err,
            };

            let failure = FailedAttempt {
                name,
                attempt,
                max_attempts,
                error_type,
                error: &err,
            };

            if !self.predicate.should_retry(&err) {
                self.observer.on_fatal(&failure);
                self.observer.on_state(name, CallState::DoneFailure);
                return Err(err);
            }

            if attempt >= max_attempts {
                self.observer.on_exhausted(&failure);
                self.observer.on_state(name, CallState::DoneFailure);
                return Err(err);
            }

            let delay = self.policy.wait.calculate_delay();
            self.observer.on_retry(&failure, delay);
            self.observer.on_state(name, CallState::Waiting);
            drop(err);

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

/// Retry `op` under `policy`, retrying only classified transient errors.
pub async fn retry<T, E, F, Fut>(name: &str, policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    Retrier::new(policy.clone()).call(name, op).await
}

/// Wraps a cloneable client so every call made through it is retried on
/// transient errors.
///
/// ```rust,no_run
/// use settle::{RemoteClient, Retriable};
/// use settle::config::HttpSettings;
///
/// # async fn example() -> Result<(), settle::RemoteError> {
/// let client = Retriable::wrap(RemoteClient::new(&HttpSettings::default())?);
/// let doc = client
///     .call("get_resource", |c| async move { c.get_json("https://example.com/r/1").await })
///     .await?;
/// # let _ = doc;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Retriable<C, P = TransientPredicate, O = LogObserver> {
    client: C,
    retrier: Retrier<P, O>,
}

impl<C: Clone> Retriable<C> {
    /// Wrap with [`RetryPolicy::transient_client`].
    pub fn wrap(client: C) -> Self {
        Self::with_policy(client, RetryPolicy::transient_client())
    }

    pub fn with_policy(client: C, policy: RetryPolicy) -> Self {
        Self {
            client,
            retrier: Retrier::new(policy),
        }
    }

    /// Wrap with a fully configured retrier.
    pub fn with_retrier<P, O>(client: C, retrier: Retrier<P, O>) -> Retriable<C, P, O> {
        Retriable { client, retrier }
    }
}

impl<C: Clone, P, O: RetryObserver> Retriable<C, P, O> {
    pub fn inner(&self) -> &C {
        &self.client
    }

    pub fn retrier(&self) -> &Retrier<P, O> {
        &self.retrier
    }

    /// Run one client call under the retry policy. `op` receives a fresh
    /// clone of the client on every attempt.
    pub async fn call<T, E, F, Fut>(&self, name: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: RetryPredicate<E>,
    {
        self.retrier
            .call(name, || op(self.client.clone()))
            .await
    }
}
