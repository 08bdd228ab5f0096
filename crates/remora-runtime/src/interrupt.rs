//! Interruptable waits.
//!
//! An [`InterruptableFuture`] is a single-assignment result slot shared by
//! every clone of the handle. Whoever completes it first wins: either the
//! operation it represents (through [`InterruptableFuture::set_result`] or
//! [`interruptable_task`]) or an external caller through
//! [`InterruptableFuture::interrupt`]. Later completions are ignored.
//!
//! [`InterruptableFuture::with_interrupt`] races an arbitrary operation
//! against the slot. Losing the race drops the operation future; pass the
//! work through [`InterruptableFuture::with_interrupt_spawned`] when it must
//! keep running after the caller stops waiting.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::RuntimeError;

type Slot<T, E> = Option<Result<T, E>>;

/// A result slot that can be completed externally to abort a wait.
pub struct InterruptableFuture<T, E> {
    outcome: Arc<watch::Sender<Slot<T, E>>>,
}

impl<T, E> InterruptableFuture<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Create a pending future.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            outcome: Arc::new(sender),
        }
    }

    /// Complete the future with `reason` as its failure.
    ///
    /// Returns `false` (and changes nothing) if it was already completed.
    pub fn interrupt(&self, reason: E) -> bool {
        let interrupted = self.complete(Err(reason));
        if interrupted {
            tracing::debug!("interruptable future interrupted");
        }
        interrupted
    }

    /// Complete the future with a value.
    ///
    /// Returns `false` (and changes nothing) if it was already completed.
    pub fn set_result(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Whether the future has been completed.
    pub fn is_done(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// The outcome, if the future has been completed.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.outcome.borrow().clone()
    }

    fn complete(&self, outcome: Result<T, E>) -> bool {
        self.outcome.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }
}

impl<T, E> InterruptableFuture<T, E>
where
    T: Clone,
    E: Clone + From<RuntimeError>,
{
    /// Wait until the future is completed and return its outcome.
    pub async fn wait(&self) -> Result<T, E> {
        let mut receiver = self.outcome.subscribe();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if receiver.changed().await.is_err() {
                return Err(RuntimeError::Abandoned("result slot closed".into()).into());
            }
        }
    }

    /// Run `operation` while watching this future.
    ///
    /// If the future is interrupted first, the interruption reason is
    /// returned and `operation` is no longer awaited. If `operation` finishes
    /// first, its result is returned and the future is left untouched. A
    /// future that is already interrupted wins over an operation that is
    /// already ready.
    pub async fn with_interrupt<F, U>(&self, operation: F) -> Result<U, E>
    where
        F: Future<Output = Result<U, E>>,
    {
        tokio::select! {
            biased;
            outcome = self.wait() => match outcome {
                Err(reason) => Err(reason),
                Ok(_) => Err(RuntimeError::UnexpectedResult.into()),
            },
            result = operation => result,
        }
    }

    /// Like [`with_interrupt`](Self::with_interrupt), but the operation runs
    /// as its own task and keeps running when the wait is interrupted.
    pub async fn with_interrupt_spawned<F, U>(&self, operation: F) -> Result<U, E>
    where
        F: Future<Output = Result<U, E>> + Send + 'static,
        U: Send + 'static,
        E: Send + 'static,
    {
        let handle = tokio::spawn(operation);
        self.with_interrupt(async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(RuntimeError::Abandoned(join_error.to_string()).into()),
            }
        })
        .await
    }
}

impl<T: Clone, E: Clone> Default for InterruptableFuture<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for InterruptableFuture<T, E> {
    fn clone(&self) -> Self {
        Self {
            outcome: Arc::clone(&self.outcome),
        }
    }
}

impl<T, E> fmt::Debug for InterruptableFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.outcome.borrow() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("InterruptableFuture")
            .field("state", &state)
            .finish()
    }
}

/// Spawn `task` on the current runtime and return an interruptable handle
/// to its outcome.
///
/// The task receives a clone of the handle so that it can watch for
/// interruption itself (typically through
/// [`InterruptableFuture::with_interrupt`]). Its result is recorded only if
/// nobody interrupted the handle in the meantime.
pub fn interruptable_task<T, E, F, Fut>(task: F) -> InterruptableFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: FnOnce(InterruptableFuture<T, E>) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let future = InterruptableFuture::new();
    let running = task(future.clone());
    let slot = future.clone();

    tokio::spawn(async move {
        let outcome = running.await;
        if !slot.complete(outcome) {
            tracing::debug!("interruptable task finished after its handle was completed");
        }
    });

    future
}
