//! Retry, fallback and error recovery for Mooring.
//!
//! Three independent tools live here:
//!
//! - [`with_retry`] / [`with_retry_if`]: run a fallible async operation under
//!   an exponential-backoff [`RetryPolicy`].
//! - [`with_fallback`]: run a primary operation and, if it fails, a fallback.
//! - [`RecoveryEngine`]: a registry of [`RecoveryStrategy`]s keyed by
//!   [`ErrorCategory`]. Captured [`ErrorRecord`]s are drained one at a time by
//!   a single in-flight loop, so two strategies never race each other.
//!
//! The combinators do not compose implicitly: callers that want both retry
//! and fallback nest them explicitly.

mod engine;
mod fallback;
mod record;
mod retry;
mod strategy;

pub use engine::{RecoveryEngine, RecoveryOutcome, RecoveryStats};
pub use fallback::with_fallback;
pub use record::{Classify, ErrorCategory, ErrorRecord, Severity};
pub use retry::{RetryPolicy, with_retry, with_retry_if};
pub use strategy::{AwaitConnectivity, FnStrategy, PurgeCache, RecoveryStrategy};
