//! Optimistic updates
//!
//! The local change is applied before the remote call starts and reverted
//! only if that call fails. Failures are never retried.

use std::future::Future;

use log::warn;
use onemedi_core::RemoteResult;

use crate::notify::{Notice, SharedNotifier};

/// Runs remote operations behind an optimistic local change
#[derive(Clone)]
pub struct Optimistic {
    notifier: SharedNotifier,
    failure_title: String,
}

impl Optimistic {
    /// Create with the default failure title
    pub fn new(notifier: SharedNotifier) -> Self {
        Optimistic {
            notifier,
            failure_title: "Update failed".to_string(),
        }
    }

    /// Title of the failure notice
    pub fn with_failure_title(mut self, title: impl Into<String>) -> Self {
        self.failure_title = title.into();
        self
    }

    /// Apply, call, and roll back on failure.
    ///
    /// `apply` runs before `operation` is invoked; `rollback` runs if and
    /// only if the operation fails. The error is returned to the caller after
    /// the failure notice has been raised.
    pub async fn run<T, A, B, Op, Fut>(&self, apply: A, rollback: B, operation: Op) -> RemoteResult<T>
    where
        A: FnOnce(),
        B: FnOnce(),
        Op: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        apply();
        match operation().await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Optimistic update failed, rolling back: {}", e);
                rollback();
                self.notifier.notify(Notice::failure(self.failure_title.clone(), &e));
                Err(e)
            }
        }
    }

    /// Same as `run` for state the caller holds by `&mut`
    pub async fn run_on<S, T, A, B, Op, Fut>(
        &self,
        state: &mut S,
        apply: A,
        rollback: B,
        operation: Op,
    ) -> RemoteResult<T>
    where
        A: FnOnce(&mut S),
        B: FnOnce(&mut S),
        Op: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        apply(state);
        match operation().await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Optimistic update failed, rolling back: {}", e);
                rollback(state);
                self.notifier.notify(Notice::failure(self.failure_title.clone(), &e));
                Err(e)
            }
        }
    }
}
