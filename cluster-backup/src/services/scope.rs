//! Guaranteed cleanup around a fallible async body.

use crate::utils::Result;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::warn;

/// Run `body`, then always run `cleanup` exactly once, even when the body
/// fails or panics.
///
/// The body's error wins over a cleanup error; a cleanup error after a
/// successful body is returned. A panic in the body is resumed after cleanup.
pub async fn with_cleanup<T, B, C, CF>(body: B, cleanup: C) -> Result<T>
where
    B: Future<Output = Result<T>>,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<()>>,
{
    let outcome = AssertUnwindSafe(body).catch_unwind().await;
    let cleaned = cleanup().await;

    match outcome {
        Err(panic) => std::panic::resume_unwind(panic),
        Ok(Ok(value)) => cleaned.map(|()| value),
        Ok(Err(e)) => {
            if let Err(cleanup_error) = cleaned {
                warn!(error = %cleanup_error, "Cleanup failed after an earlier error");
            }
            Err(e)
        }
    }
}
