//! Single retry on transient persistence failures.

use std::future::Future;

use tracing::warn;

use crate::Result;

/// Run `call`, retrying up to `retries` times while it fails transiently.
///
/// Validation and referential errors are returned on the first attempt.
pub(crate) async fn with_retry<T, F, Fut>(op: &'static str, retries: u32, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                warn!(op, attempt, error = %e, "transient persistence failure, retrying");
            }
            result => return result,
        }
    }
}
