//! Query handle
//!
//! A `QueryHandle` owns one read descriptor and the state derived from it:
//! the last applied rows, a loading flag and the last error. Reads may
//! overlap; each takes a sequence number and a response is applied only if
//! no newer response has been applied already. `loading` counts requests in
//! flight, so it drops to false exactly when every issued read has settled,
//! including reads whose future was dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use onemedi_core::table::decode_rows;
use onemedi_core::{QueryDescriptor, Record, RemoteError, RemoteResult, SharedBackend};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::notify::{Notice, SharedNotifier};

/// Observable state of a query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<R> {
    /// Rows of the last applied response
    pub data: Vec<R>,
    /// Whether any read is in flight
    pub loading: bool,
    /// Error of the last applied response
    pub error: Option<RemoteError>,
}

impl<R> Default for QueryState<R> {
    fn default() -> Self {
        QueryState {
            data: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

/// Options for a query handle
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Fetch on mount and whenever the descriptor changes
    pub auto_fetch: bool,
    /// Title of the failure notice
    pub failure_title: String,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            auto_fetch: true,
            failure_title: "Failed to load data".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    issued: u64,
    applied: u64,
    in_flight: usize,
}

struct Shared<R> {
    backend: SharedBackend,
    notifier: SharedNotifier,
    options: QueryOptions,
    descriptor: Mutex<QueryDescriptor>,
    progress: Mutex<Progress>,
    state: watch::Sender<QueryState<R>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One issued read; settles the in-flight count even when dropped early
struct InFlight<'a, R> {
    shared: &'a Shared<R>,
    sequence: u64,
    settled: bool,
}

impl<'a, R: Record> InFlight<'a, R> {
    fn begin(shared: &'a Shared<R>) -> Self {
        let mut progress = lock(&shared.progress);
        progress.issued += 1;
        progress.in_flight += 1;
        let sequence = progress.issued;
        shared.state.send_modify(|state| state.loading = true);
        InFlight {
            shared,
            sequence,
            settled: false,
        }
    }

    fn settle(mut self, result: &RemoteResult<Vec<R>>) {
        self.settled = true;

        let applied = {
            let mut progress = lock(&self.shared.progress);
            progress.in_flight -= 1;
            let apply = self.sequence > progress.applied;
            if apply {
                progress.applied = self.sequence;
            }
            let loading = progress.in_flight > 0;

            self.shared.state.send_modify(|state| {
                if apply {
                    match result {
                        Ok(rows) => {
                            state.data = rows.clone();
                            state.error = None;
                        }
                        Err(e) => state.error = Some(e.clone()),
                    }
                }
                state.loading = loading;
            });
            apply
        };

        if !applied {
            debug!("Discarded stale response #{}", self.sequence);
            return;
        }
        if let Err(e) = result {
            self.shared
                .notifier
                .notify(Notice::failure(self.shared.options.failure_title.clone(), e));
        }
    }
}

impl<'a, R> Drop for InFlight<'a, R> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut progress = lock(&self.shared.progress);
        progress.in_flight -= 1;
        let loading = progress.in_flight > 0;
        self.shared.state.send_modify(|state| state.loading = loading);
        debug!("Read #{} was cancelled", self.sequence);
    }
}

/// Handle over one read descriptor and its state
pub struct QueryHandle<R: Record> {
    shared: Arc<Shared<R>>,
}

impl<R: Record> Clone for QueryHandle<R> {
    fn clone(&self) -> Self {
        QueryHandle {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Record> QueryHandle<R> {
    /// Handle with default options
    pub fn new(backend: SharedBackend, notifier: SharedNotifier, descriptor: QueryDescriptor) -> Self {
        Self::with_options(backend, notifier, descriptor, QueryOptions::default())
    }

    /// Handle with explicit options
    pub fn with_options(
        backend: SharedBackend,
        notifier: SharedNotifier,
        descriptor: QueryDescriptor,
        options: QueryOptions,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        QueryHandle {
            shared: Arc::new(Shared {
                backend,
                notifier,
                options,
                descriptor: Mutex::new(descriptor),
                progress: Mutex::new(Progress::default()),
                state,
            }),
        }
    }

    /// Issue the initial read when auto-fetch is on
    pub async fn mount(&self) -> Option<RemoteResult<Vec<R>>> {
        if !self.shared.options.auto_fetch {
            return None;
        }
        Some(self.fetch().await)
    }

    /// Replace the descriptor.
    ///
    /// A descriptor equal to the current one is ignored. Otherwise exactly
    /// one read is issued when auto-fetch is on.
    pub async fn set_descriptor(&self, descriptor: QueryDescriptor) -> Option<RemoteResult<Vec<R>>> {
        {
            let mut current = lock(&self.shared.descriptor);
            if *current == descriptor {
                return None;
            }
            *current = descriptor;
        }
        self.mount().await
    }

    /// Re-issue the current descriptor
    pub async fn refetch(&self) -> RemoteResult<Vec<R>> {
        self.fetch().await
    }

    /// Re-issue the current descriptor on a background task
    pub fn spawn_refetch(&self) -> JoinHandle<RemoteResult<Vec<R>>> {
        let handle = self.clone();
        tokio::spawn(async move { handle.fetch().await })
    }

    async fn fetch(&self) -> RemoteResult<Vec<R>> {
        let descriptor = self.descriptor();
        let read = InFlight::begin(&self.shared);
        debug!("Read #{} on {}", read.sequence, descriptor.table);

        let result = match self.shared.backend.select(&descriptor).await {
            Ok(rows) => decode_rows::<R>(rows),
            Err(e) => Err(e),
        };
        read.settle(&result);
        result
    }

    /// Current descriptor
    pub fn descriptor(&self) -> QueryDescriptor {
        lock(&self.shared.descriptor).clone()
    }

    /// Snapshot of the state
    pub fn state(&self) -> QueryState<R> {
        self.shared.state.borrow().clone()
    }

    /// Rows of the last applied response
    pub fn data(&self) -> Vec<R> {
        self.shared.state.borrow().data.clone()
    }

    /// Whether any read is in flight
    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().loading
    }

    /// Error of the last applied response
    pub fn error(&self) -> Option<RemoteError> {
        self.shared.state.borrow().error.clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<QueryState<R>> {
        self.shared.state.subscribe()
    }
}
