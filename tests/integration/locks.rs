//! Integration tests for named locks around shared fixtures.

use futures::future::join_all;
use settle::LockRegistry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A shared setting that tests flip temporarily and then restore.
#[derive(Default)]
struct SharedSetting {
    value: Mutex<String>,
    observed: Mutex<Vec<String>>,
}

impl SharedSetting {
    fn set(&self, value: &str) -> String {
        std::mem::replace(&mut *self.value.lock().unwrap(), value.to_string())
    }

    fn observe(&self) {
        let current = self.value.lock().unwrap().clone();
        self.observed.lock().unwrap().push(current);
    }
}

#[tokio::test]
async fn test_temporary_override_is_not_interleaved() {
    let locks = LockRegistry::new();
    let setting = Arc::new(SharedSetting::default());
    setting.set("default");

    let tasks = (0..4).map(|i| {
        let locks = locks.clone();
        let setting = setting.clone();
        async move {
            let _guard = locks.lock("bucket_config").await;
            let previous = setting.set(&format!("override-{i}"));
            tokio::time::sleep(Duration::from_millis(5)).await;
            setting.observe();
            setting.set(&previous);
        }
    });
    join_all(tasks).await;

    let observed = setting.observed.lock().unwrap().clone();
    let mut expected: Vec<String> = (0..4).map(|i| format!("override-{i}")).collect();
    let mut sorted = observed.clone();
    sorted.sort();
    expected.sort();
    assert_eq!(sorted, expected);
    assert_eq!(*setting.value.lock().unwrap(), "default");
}

#[tokio::test]
async fn test_with_lock_returns_value_and_releases() {
    let locks = LockRegistry::new();

    let value = locks.with_lock("index", async { 42 }).await;
    assert_eq!(value, 42);

    let reacquired = tokio::time::timeout(Duration::from_millis(100), locks.lock("index")).await;
    assert!(reacquired.is_ok());
    assert_eq!(locks.len(), 1);
}
