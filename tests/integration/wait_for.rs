//! Integration tests for condition polling.

use futures::future::join_all;
use settle::{wait_for, wait_until, WaitOptions};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::integration::CapturedLog;

#[derive(Debug, Error, PartialEq)]
#[error("bad state: {0}")]
struct BadState(String);

fn options(max_wait: Duration, interval: Duration) -> WaitOptions {
    WaitOptions::new(max_wait, interval).with_logger(|_| {})
}

#[tokio::test]
async fn test_immediate_success_does_not_sleep() {
    let started = Instant::now();
    let outcome = wait_for(
        "already_there",
        || async { Ok::<_, Infallible>((true, Some("x"))) },
        &options(Duration::from_secs(10), Duration::from_secs(5)),
    )
    .await
    .unwrap();

    assert_eq!(outcome.clone().into_pair(), (true, Some("x")));
    assert_eq!(outcome.attempts, 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_eventual_success_within_deadline() {
    let calls = AtomicU32::new(0);
    let outcome = wait_for(
        "third_call",
        || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok::<_, Infallible>((false, None))
            } else {
                Ok((true, Some("ok")))
            }
        },
        &options(Duration::from_secs(10), Duration::from_millis(10)),
    )
    .await
    .unwrap();

    assert_eq!(outcome.into_pair(), (true, Some("ok")));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_timeout_without_success() {
    let started = Instant::now();
    let outcome = wait_for(
        "never",
        || async { Ok::<_, Infallible>((false, None::<String>)) },
        &options(Duration::from_millis(50), Duration::from_millis(20)),
    )
    .await
    .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome.into_pair(), (false, None));
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
}

#[tokio::test]
async fn test_condition_errors_propagate() {
    let calls = AtomicU32::new(0);
    let result = wait_for(
        "exploding",
        || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(bool, Option<()>), _>(BadState("missing field".into()))
        },
        &options(Duration::from_secs(10), Duration::from_millis(10)),
    )
    .await;

    assert_eq!(result.unwrap_err(), BadState("missing field".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_error_after_pending_evaluations() {
    let calls = AtomicU32::new(0);
    let result = wait_until(
        "fails_later",
        || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Ok(false),
                n => Err(BadState(format!("call {n}"))),
            }
        },
        &options(Duration::from_secs(10), Duration::from_millis(5)),
    )
    .await;

    assert_eq!(result.unwrap_err(), BadState("call 2".into()));
}

#[tokio::test]
async fn test_progress_lines() {
    let log = CapturedLog::new();
    let options = WaitOptions::new(Duration::from_millis(30), Duration::from_millis(10))
        .with_logger(log.sink());

    wait_until(
        "label_applied",
        || async { Ok::<_, Infallible>(false) },
        &options,
    )
    .await
    .unwrap();

    let lines = log.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "start wait_for 'label_applied', max_wait=0.03s");
    assert!(lines[1].starts_with("wait_for 'label_applied' success=false in "));
}

#[tokio::test]
async fn test_concurrent_waits_are_independent() {
    let counters: Vec<AtomicU32> = (0..5).map(|_| AtomicU32::new(0)).collect();
    let options = options(Duration::from_secs(5), Duration::from_millis(5));

    let waits = counters.iter().enumerate().map(|(i, counter)| {
        let options = &options;
        async move {
            let name = format!("resource_{i}");
            wait_for(
                &name,
                || async {
                    let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
                    Ok::<_, Infallible>((n >= i, Some(n)))
                },
                options,
            )
            .await
        }
    });

    let outcomes = join_all(waits).await;
    for (i, outcome) in outcomes.into_iter().enumerate() {
        let outcome = outcome.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.name, format!("resource_{i}"));
        assert_eq!(outcome.payload, Some(i));
        assert_eq!(outcome.attempts as usize, i + 1);
    }
}
