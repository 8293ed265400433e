//! Failure-handling primitives: retry with backoff.

pub mod retry;

pub use retry::{retry, RetryPolicy};
