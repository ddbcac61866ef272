//! Ready-made conditions over HTTP resources, for use with
//! [`wait_for`](crate::wait::wait_for).
//!
//! Each fetch goes through a [`Retrier`] so transient gateway errors are
//! ridden out inside a single evaluation. A missing resource (404) means "not
//! there yet"; any other failure is returned and ends the wait.

use crate::error::RemoteError;
use crate::remote::RemoteClient;
use crate::retry::{Retrier, RetryObserver, RetryPredicate};
use serde_json::Value;

/// Succeeds once `path` answers with `expected`.
///
/// Waiting for a 404 (a deleted resource) works too: a non-2xx status equal
/// to `expected` counts as success.
pub async fn http_status_is<P, O>(
    retrier: &Retrier<P, O>,
    client: &RemoteClient,
    path: &str,
    expected: u16,
) -> Result<(bool, Option<u16>), RemoteError>
where
    P: RetryPredicate<RemoteError>,
    O: RetryObserver,
{
    match retrier.call(&format!("GET {path}"), || client.get(path)).await {
        Ok(response) => Ok((response.status == expected, Some(response.status))),
        Err(RemoteError::Status { status, .. }) if status == expected => {
            Ok((true, Some(status)))
        }
        Err(err) if err.is_not_found() => Ok((false, None)),
        Err(err) => Err(err),
    }
}

/// Succeeds once the JSON document at `path` has `expected` at `pointer`
/// (RFC 6901, e.g. `/status/phase`). The fetched document is the payload.
pub async fn json_pointer_equals<P, O>(
    retrier: &Retrier<P, O>,
    client: &RemoteClient,
    path: &str,
    pointer: &str,
    expected: &Value,
) -> Result<(bool, Option<Value>), RemoteError>
where
    P: RetryPredicate<RemoteError>,
    O: RetryObserver,
{
    let doc = match retrier
        .call(&format!("GET {path}"), || client.get_json(path))
        .await
    {
        Ok(doc) => doc,
        Err(err) if err.is_not_found() => return Ok((false, None)),
        Err(err) => return Err(err),
    };

    let matched = doc.pointer(pointer) == Some(expected);
    Ok((matched, Some(doc)))
}
