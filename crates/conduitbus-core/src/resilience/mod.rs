//! Resilience primitives used to harden the connection pool.
//!
//! Currently just retry-with-backoff, wrapped around
//! [`crate::pool::ConnectionPool::get`]'s broker dial.
//!
//! # Example
//!
//! ```rust,ignore
//! use conduitbus_core::resilience::{RetryExecutor, RetryConfig};
//!
//! let retry = RetryExecutor::new(RetryConfig::default());
//! let result = retry.execute("dial_broker", || async {
//!     Ok::<_, std::io::Error>("connected")
//! }).await;
//! ```

mod retry;

pub use retry::{RetryConfig, RetryError, RetryExecutor, RetryPolicy};
