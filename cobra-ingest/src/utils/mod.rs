//! Utility modules for cobra-ingest

pub mod backoff;
pub mod db_retry;

pub use backoff::{retry_transient, RetryFailure, RetryPolicy, Transient};
pub use db_retry::retry_on_lock;
