//! Integration tests for the retry wrapper.

use settle::retry::{NoOpObserver, StatsObserver};
use settle::{retry, RemoteError, Retriable, Retrier, RetryPolicy};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn quick(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(5)).with_max_attempts(max_attempts)
}

#[tokio::test]
async fn test_success_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let result = retry("flaky_get", &quick(5), || async {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(RemoteError::status(503, "service unavailable"))
        } else {
            Ok("ok")
        }
    })
    .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhaustion_returns_last_error() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = retry("always_down", &quick(3), || async {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(RemoteError::status(502, format!("bad gateway #{n}")))
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.status_code(), Some(502));
    assert_eq!(err.to_string(), "HTTP 502: bad gateway #3");
}

#[tokio::test]
async fn test_fatal_error_short_circuits() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = retry("unauthorized", &quick(5), || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::status(401, "unauthorized"))
    })
    .await;

    assert_eq!(result.unwrap_err().status_code(), Some(401));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_embedded_status_in_untyped_message_is_retried() {
    let calls = AtomicU32::new(0);
    let result = retry("untyped", &quick(3), || async {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(RemoteError::from_message("Unknown error: (503) upstream"))
        } else {
            Ok(1)
        }
    })
    .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    calls.store(0, Ordering::SeqCst);
    let result: Result<(), _> = retry("untyped_fatal", &quick(3), || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::from_message("error 5030 while reading"))
    })
    .await;

    assert!(matches!(result, Err(RemoteError::Unknown(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_io_errors_are_classified() {
    let calls = AtomicU32::new(0);
    let result = retry("socket", &quick(4), || async {
        match calls.fetch_add(1, Ordering::SeqCst) {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            1 => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            _ => Ok(()),
        }
    })
    .await;
    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    calls.store(0, Ordering::SeqCst);
    let result: Result<(), _> = retry("missing_file", &quick(4), || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::NotFound, "missing"))
    })
    .await;
    assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_messages() {
    let observer = Arc::new(StatsObserver::new());
    let retrier = Retrier::new(quick(3)).with_observer(observer.clone());
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = retrier
        .call("create_index", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(RemoteError::status(504, format!("timeout {n}")))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(
        observer.messages(),
        vec![
            "[Retry #1/3] Retrying 'create_index' due to RemoteError: HTTP 504: timeout 1",
            "[Retry #2/3] Retrying 'create_index' due to RemoteError: HTTP 504: timeout 2",
        ]
    );
    assert_eq!(observer.retries(), 2);
    assert_eq!(observer.exhaustions(), 1);
    assert_eq!(observer.fatals(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_policy_only_retries_429() {
    let calls = AtomicU32::new(0);
    let retrier = Retrier::new(RetryPolicy::rate_limited()).with_observer(NoOpObserver);

    let result = retrier
        .call("create_kb", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(RemoteError::status(429, "too many requests"))
            } else {
                Ok("kb-1")
            }
        })
        .await;
    assert_eq!(result.unwrap(), "kb-1");
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    calls.store(0, Ordering::SeqCst);
    let result: Result<(), _> = retrier
        .call("create_kb", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::status(503, "unavailable"))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_untyped_rate_limit_message_is_retried_when_opted_in() {
    let calls = AtomicU32::new(0);
    let limited = Retrier::new(RetryPolicy::rate_limited()).with_observer(NoOpObserver);

    let result = limited
        .call("create_kb", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RemoteError::from_message(
                    "Error creating KB: 429 Too Many Requests",
                ))
            } else {
                Ok("kb-2")
            }
        })
        .await;
    assert_eq!(result.unwrap(), "kb-2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    calls.store(0, Ordering::SeqCst);
    let result: Result<(), _> = retry("create_kb_default", &quick(3), || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::from_message("Error creating KB: 429 Too Many Requests"))
    })
    .await;
    assert_eq!(result.unwrap_err().status_code(), Some(429));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[derive(Clone)]
struct FakeClient {
    failures_left: Arc<AtomicU32>,
}

impl FakeClient {
    async fn fetch(&self, id: u32) -> Result<String, RemoteError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(RemoteError::Connection("connection refused".into()));
        }
        Ok(format!("item-{id}"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_retriable_client_wrapper() {
    let client = Retriable::wrap(FakeClient {
        failures_left: Arc::new(AtomicU32::new(3)),
    });
    assert_eq!(client.retrier().policy().max_attempts(), 24);

    let item = client
        .call("fetch", |c| async move { c.fetch(7).await })
        .await
        .unwrap();

    assert_eq!(item, "item-7");
    assert_eq!(client.inner().failures_left.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retriable_with_custom_policy() {
    let client = Retriable::with_policy(
        FakeClient {
            failures_left: Arc::new(AtomicU32::new(10)),
        },
        quick(2),
    );

    let result = client
        .call("fetch", |c| async move { c.fetch(1).await })
        .await;

    assert!(matches!(result, Err(RemoteError::Connection(_))));
    assert_eq!(client.inner().failures_left.load(Ordering::SeqCst), 8);
}
