//! Wait for eventually-consistent effects and retry flaky remote calls.
//!
//! ```rust,no_run
//! use settle::{wait_for, WaitOptions};
//! use std::convert::Infallible;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let options = WaitOptions::new(Duration::from_secs(30), Duration::from_secs(1));
//! let outcome = wait_for(
//!     "resource_processed",
//!     || async { Ok::<_, Infallible>((true, Some("done"))) },
//!     &options,
//! )
//! .await
//! .unwrap();
//! assert!(outcome.success);
//! # }
//! ```

pub mod clock;
pub mod conditions;
pub mod config;
pub mod error;
pub mod lock;
pub mod remote;
pub mod retry;
pub mod retry_policy;
pub mod wait;

pub use config::SettleConfig;
pub use error::{Classify, RemoteError, TransientKind};
pub use lock::LockRegistry;
pub use remote::{RemoteClient, RemoteResponse};
pub use retry::{retry, CallState, Retriable, Retrier, RetryObserver, RetryPredicate};
pub use retry_policy::RetryPolicy;
pub use wait::{wait_for, wait_until, WaitOptions, WaitOutcome, WaitTimeout};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
