//! Deadlines on storage calls.

use std::future::Future;
use std::time::Duration;

use medvault_store::StoreError;

use crate::error::StorageTimeout;

/// Await a storage call, failing with [`StorageTimeout`] once `limit` passes.
///
/// The inner future is dropped on timeout.
pub(crate) async fn bounded<T, E, F>(limit: Duration, operation: &'static str, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, StoreError>>,
    E: From<StoreError> + From<StorageTimeout>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(E::from),
        Err(_) => Err(expired(limit, operation).into()),
    }
}

/// The timeout reported when `operation` ran past `limit`.
pub(crate) fn expired(limit: Duration, operation: &'static str) -> StorageTimeout {
    let after_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
    tracing::warn!(operation, after_ms, "storage call timed out");
    StorageTimeout {
        operation,
        after_ms,
    }
}
