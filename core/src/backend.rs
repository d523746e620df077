//! The backend boundary
//!
//! Every read, write, subscription and function call crosses one trait,
//! `RemoteBackend`. Components receive the backend as an explicit
//! `SharedBackend` constructor argument; there is no process-wide client.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RemoteResult;
use crate::models::{ChangeEvent, Row, RowId};
use crate::query::QueryDescriptor;

/// Hosted persistence service as seen by the data layer
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Rows matching the descriptor, in the requested order
    async fn select(&self, query: &QueryDescriptor) -> RemoteResult<Vec<Row>>;

    /// Insert a row; the backend assigns the id
    async fn insert(&self, table: &str, fields: Map<String, Value>) -> RemoteResult<Row>;

    /// Overwrite the given fields of one row
    async fn update(&self, table: &str, id: &RowId, fields: Map<String, Value>) -> RemoteResult<Row>;

    /// Delete one row
    async fn delete(&self, table: &str, id: &RowId) -> RemoteResult<()>;

    /// Open a change feed for a table
    async fn subscribe(&self, table: &str) -> RemoteResult<Subscription>;

    /// Call a server-side function
    async fn invoke(&self, function: &str, payload: Value) -> RemoteResult<Value>;
}

/// Backend handle shared by every component
pub type SharedBackend = Arc<dyn RemoteBackend>;

/// An open change feed for one table.
///
/// The connection behind it is owned by a feed task. Dropping the
/// subscription, or calling `unsubscribe`, stops that task and releases the
/// connection.
#[derive(Debug)]
pub struct Subscription {
    table: String,
    receiver: mpsc::Receiver<ChangeEvent>,
    feed: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a receiver fed by `feed`
    pub fn new(table: impl Into<String>, receiver: mpsc::Receiver<ChangeEvent>, feed: JoinHandle<()>) -> Self {
        Subscription {
            table: table.into(),
            receiver,
            feed: Some(feed),
        }
    }

    /// Subscribed table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next event; `None` once the feed has ended
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is already buffered
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Whether the feed task is still running
    pub fn is_active(&self) -> bool {
        self.feed.as_ref().map_or(false, |feed| !feed.is_finished())
    }

    /// Close the feed
    pub fn unsubscribe(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
            info!("Unsubscribed from change feed for '{}'", self.table);
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// A running callback subscription created by `TableClient::subscribe`.
///
/// Dropping the handle stops the callback and closes the feed.
#[derive(Debug)]
pub struct SubscriptionHandle {
    table: String,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Deliver every event of `subscription` to `handler` on a background task
    pub fn spawn<F>(mut subscription: Subscription, mut handler: F) -> Self
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let table = subscription.table().to_string();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                debug!("Delivering {} event for row {}", event.kind(), event.row_id());
                handler(event);
            }
        });
        SubscriptionHandle {
            table,
            task: Some(task),
        }
    }

    /// Subscribed table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Stop delivering events
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
