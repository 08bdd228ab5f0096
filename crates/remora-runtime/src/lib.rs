//! Remora runtime primitives
//!
//! Small building blocks used by the remora control layer to stay responsive
//! when talking to flaky remote services:
//!
//! - [`RefObjectStore`]: a reference-counted cache for objects that several
//!   concurrent scopes share (a broker connection, a transport).
//! - [`InterruptableFuture`]: a result slot that can be completed from the
//!   outside, used to stop waiting on an in-flight operation.
//! - [`ExponentialBackoffRetry`]: re-invokes a fallible async operation with a
//!   doubling delay between attempts.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use remora_runtime::{ExponentialBackoffRetry, InterruptableFuture};
//!
//! let retry = ExponentialBackoffRetry::new(Duration::from_secs(1), 3);
//! let value = retry.run(|| async { fetch_status().await }).await?;
//!
//! let wait = InterruptableFuture::<(), MyError>::new();
//! let stopper = wait.clone();
//! tokio::spawn(async move { stopper.interrupt(MyError::Shutdown) });
//! wait.with_interrupt(long_poll()).await?;
//! ```

pub mod error;
pub mod interrupt;
pub mod ref_store;
pub mod retry;

pub use error::{RuntimeError, RuntimeResult};
pub use interrupt::{InterruptableFuture, interruptable_task};
pub use ref_store::{ObjectRef, RefObjectStore};
pub use retry::{DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_ATTEMPTS, ExponentialBackoffRetry};
