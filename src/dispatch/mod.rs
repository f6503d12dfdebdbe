//! Fan-Out Dispatcher
//!
//! Issues module calls concurrently and waits for all of them to settle.
//! There is no fail-fast: every module contributes distinct data, so a slow
//! module is still waited for, up to the per-call deadline.

mod fan_out;
pub mod retry;

pub use fan_out::{Dispatcher, DEFAULT_CALL_TIMEOUT};
pub use retry::RetryPolicy;
