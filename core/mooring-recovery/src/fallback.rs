use std::fmt;
use std::future::Future;
use tracing::warn;

/// Runs `primary`; if it fails, runs `fallback` and returns its result.
///
/// No retry is layered underneath. Wrap `primary` in
/// [`with_retry`](crate::with_retry) when both are wanted.
pub async fn with_fallback<T, E, P, PFut, F, FFut>(primary: P, fallback: F) -> Result<T, E>
where
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<T, E>>,
    F: FnOnce() -> FFut,
    FFut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match primary().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Primary operation failed, using fallback: {}", e);
            fallback().await
        }
    }
}
