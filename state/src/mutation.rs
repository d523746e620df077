//! Mutation handle
//!
//! `Mutator` performs create, update and remove calls against one table.
//! Every call settles with exactly one callback (`on_success` or
//! `on_error`) and one notice. `loading` is shared by overlapping calls and
//! clears when the last one settles.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use onemedi_core::config::NotificationConfig;
use onemedi_core::{Record, RemoteError, RemoteResult, RowId, SharedBackend, TableClient, TableRecord};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::notify::{Notice, SharedNotifier};

/// Result of a successful mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<R> {
    /// A row was created
    Created(R),
    /// A row was updated
    Updated(R),
    /// A row was removed
    Removed(RowId),
}

type SuccessCallback<R> = Box<dyn Fn(&MutationOutcome<R>) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&RemoteError) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Action {
    Create,
    Update,
    Remove,
}

impl Action {
    fn success_text(self) -> &'static str {
        match self {
            Action::Create => "created successfully",
            Action::Update => "updated successfully",
            Action::Remove => "deleted successfully",
        }
    }

    fn failure_title(self) -> &'static str {
        match self {
            Action::Create => "Failed to create",
            Action::Update => "Failed to update",
            Action::Remove => "Failed to delete",
        }
    }
}

/// In-flight counter behind the loading flag
struct Loading {
    count: Mutex<usize>,
    flag: watch::Sender<bool>,
}

impl Loading {
    fn new() -> Self {
        Loading {
            count: Mutex::new(0),
            flag: watch::channel(false).0,
        }
    }

    fn count(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> LoadingGuard<'_> {
        let mut count = self.count();
        *count += 1;
        self.flag.send_replace(true);
        LoadingGuard { loading: self }
    }
}

struct LoadingGuard<'a> {
    loading: &'a Loading,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.loading.count();
        *count -= 1;
        self.loading.flag.send_replace(*count > 0);
    }
}

/// Create, update and remove for one table
pub struct Mutator<R: Record> {
    table: TableClient,
    notifier: SharedNotifier,
    label: String,
    success_messages: bool,
    on_success: Option<SuccessCallback<R>>,
    on_error: Option<ErrorCallback>,
    loading: Loading,
}

impl<R: Record> Mutator<R> {
    /// Mutator for `table`
    pub fn new(backend: SharedBackend, notifier: SharedNotifier, table: impl Into<String>) -> Self {
        let table = TableClient::new(backend, table);
        Mutator {
            label: "Record".to_string(),
            table,
            notifier,
            success_messages: true,
            on_success: None,
            on_error: None,
            loading: Loading::new(),
        }
    }

    /// Mutator for a record's own table
    pub fn for_record(backend: SharedBackend, notifier: SharedNotifier) -> Self
    where
        R: TableRecord,
    {
        Self::new(backend, notifier, R::TABLE)
    }

    /// Subject used in notices, e.g. `Cart item`
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Apply notification settings
    pub fn with_notifications(mut self, config: &NotificationConfig) -> Self {
        self.success_messages = config.success_messages;
        self
    }

    /// Called once per successful call
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MutationOutcome<R>) + Send + Sync + 'static,
    {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Called once per failed call
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RemoteError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Table this mutator writes to
    pub fn table(&self) -> &str {
        self.table.name()
    }

    /// Whether any call is in flight
    pub fn is_loading(&self) -> bool {
        *self.loading.flag.borrow()
    }

    /// Receiver notified when `loading` changes
    pub fn watch_loading(&self) -> watch::Receiver<bool> {
        self.loading.flag.subscribe()
    }

    /// Insert a row
    pub async fn create(&self, fields: Map<String, Value>) -> RemoteResult<R> {
        let _loading = self.loading.enter();
        let result = match self.table.create(fields).await {
            Ok(row) => R::from_row(&row),
            Err(e) => Err(e),
        };
        self.settle(Action::Create, result, MutationOutcome::Created)
    }

    /// Update fields of a row
    pub async fn update(&self, id: &RowId, fields: Map<String, Value>) -> RemoteResult<R> {
        let _loading = self.loading.enter();
        let result = match self.table.update(id, fields).await {
            Ok(row) => R::from_row(&row),
            Err(e) => Err(e),
        };
        self.settle(Action::Update, result, MutationOutcome::Updated)
    }

    /// Delete a row
    pub async fn remove(&self, id: &RowId) -> RemoteResult<()> {
        let _loading = self.loading.enter();
        let result = self.table.delete(id).await;
        let removed = id.clone();
        self.settle(Action::Remove, result, move |()| MutationOutcome::Removed(removed))
    }

    fn settle<T, F>(&self, action: Action, result: RemoteResult<T>, outcome: F) -> RemoteResult<T>
    where
        T: Clone,
        F: FnOnce(T) -> MutationOutcome<R>,
    {
        match result {
            Ok(value) => {
                debug!("{:?} on {} succeeded", action, self.table.name());
                if let Some(callback) = &self.on_success {
                    callback(&outcome(value.clone()));
                }
                if self.success_messages {
                    self.notifier.notify(Notice::success(
                        "Success",
                        format!("{} {}", self.label, action.success_text()),
                    ));
                }
                Ok(value)
            }
            Err(e) => {
                warn!("{:?} on {} failed: {}", action, self.table.name(), e);
                if let Some(callback) = &self.on_error {
                    callback(&e);
                }
                self.notifier.notify(Notice::failure(action.failure_title(), &e));
                Err(e)
            }
        }
    }
}
