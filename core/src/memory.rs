//! In-memory backend
//!
//! Implements the full `RemoteBackend` contract over process memory: the
//! store generates ids and timestamps, publishes change events per table and
//! serves registered functions. Tests inject failures and latency per
//! operation; the development server serves it over HTTP.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};

use crate::backend::{RemoteBackend, Subscription};
use crate::error::{RemoteError, RemoteResult};
use crate::models::{ChangeEvent, Row, RowId};
use crate::query::QueryDescriptor;
use crate::utils::{generate_id, now_rfc3339};

/// Default change-feed buffer per subscriber
pub const DEFAULT_FEED_BUFFER: usize = 256;

/// Server-side function handler
pub type FunctionHandler = Arc<dyn Fn(Value) -> RemoteResult<Value> + Send + Sync>;

/// Backend operation, for fault and latency injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `select`
    Select,
    /// `insert`
    Insert,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `subscribe`
    Subscribe,
    /// `invoke`
    Invoke,
}

#[derive(Debug, Clone)]
struct Fault {
    operation: Operation,
    error: RemoteError,
    remaining: Option<usize>,
}

/// Backend holding every table in memory
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    feeds: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    functions: Mutex<HashMap<String, FunctionHandler>>,
    faults: Mutex<Vec<Fault>>,
    delays: Mutex<HashMap<Operation, VecDeque<Duration>>>,
    feed_buffer: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    /// Empty store
    pub fn new() -> Self {
        Self::with_feed_buffer(DEFAULT_FEED_BUFFER)
    }

    /// Empty store with a custom change-feed buffer
    pub fn with_feed_buffer(feed_buffer: usize) -> Self {
        MemoryBackend {
            tables: Mutex::new(HashMap::new()),
            feeds: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            delays: Mutex::new(HashMap::new()),
            feed_buffer: feed_buffer.max(1),
        }
    }

    /// Replace a table's rows without publishing events
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        info!("Seeded {} rows into {}", rows.len(), table);
        lock(&self.tables).insert(table.to_string(), rows);
    }

    /// Seed from a JSON object mapping table names to row arrays
    pub fn seed_json(&self, seed: Value) -> RemoteResult<()> {
        let Value::Object(tables) = seed else {
            return Err(RemoteError::Validation(
                "seed must be an object of table name to rows".to_string(),
            ));
        };
        for (table, rows) in tables {
            let rows: Vec<Row> = serde_json::from_value(rows)?;
            self.seed(&table, rows);
        }
        Ok(())
    }

    /// Snapshot of a table in storage order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// Names of the tables holding rows
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.tables).keys().cloned().collect();
        names.sort();
        names
    }

    /// Open change-feed receivers for a table
    pub fn subscriber_count(&self, table: &str) -> usize {
        lock(&self.feeds)
            .get(table)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Register a function reachable through `invoke`
    pub fn register_function<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> RemoteResult<Value> + Send + Sync + 'static,
    {
        lock(&self.functions).insert(name.to_string(), Arc::new(handler));
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: Operation, error: RemoteError) {
        lock(&self.faults).push(Fault {
            operation,
            error,
            remaining: Some(1),
        });
    }

    /// Fail every call of `operation` until `clear_faults`
    pub fn fail_always(&self, operation: Operation, error: RemoteError) {
        lock(&self.faults).push(Fault {
            operation,
            error,
            remaining: None,
        });
    }

    /// Drop all injected failures
    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Delay the next call of `operation`; queued delays apply in call order
    pub fn delay_next(&self, operation: Operation, delay: Duration) {
        lock(&self.delays)
            .entry(operation)
            .or_default()
            .push_back(delay);
    }

    // Latency first, then injected failures, mimicking a request that
    // travels before it is rejected.
    async fn enter(&self, operation: Operation) -> RemoteResult<()> {
        let delay = lock(&self.delays)
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = lock(&self.faults);
        if let Some(index) = faults.iter().position(|f| f.operation == operation) {
            let fault = &mut faults[index];
            let error = fault.error.clone();
            let exhausted = match fault.remaining.as_mut() {
                Some(remaining) => {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                }
                None => false,
            };
            if exhausted {
                faults.remove(index);
            }
            debug!("Injected failure for {:?}: {}", operation, error);
            return Err(error);
        }
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(sender) = lock(&self.feeds).get(&event.table) {
            // No receivers is fine: nobody is listening.
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn select(&self, query: &QueryDescriptor) -> RemoteResult<Vec<Row>> {
        self.enter(Operation::Select).await?;
        let tables = lock(&self.tables);
        let rows = tables
            .get(&query.table)
            .map(|rows| query.apply(rows))
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut fields: Map<String, Value>) -> RemoteResult<Row> {
        self.enter(Operation::Insert).await?;

        let now = Value::from(now_rfc3339());
        fields.entry("created_at").or_insert_with(|| now.clone());
        fields.entry("updated_at").or_insert(now);
        let row = Row::new(generate_id(), fields);

        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        debug!("Inserted row {} into {}", row.id, table);

        self.publish(ChangeEvent::inserted(table, row.clone()));
        Ok(row)
    }

    async fn update(&self, table: &str, id: &RowId, fields: Map<String, Value>) -> RemoteResult<Row> {
        self.enter(Operation::Update).await?;

        let (old, new) = {
            let mut tables = lock(&self.tables);
            let row = tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|row| &row.id == id))
                .ok_or_else(|| RemoteError::not_found(table, id))?;
            let old = row.clone();
            row.merge(&fields);
            row.set("updated_at", now_rfc3339());
            (old, row.clone())
        };
        debug!("Updated row {} in {}", id, table);

        self.publish(ChangeEvent::updated(table, old, new.clone()));
        Ok(new)
    }

    async fn delete(&self, table: &str, id: &RowId) -> RemoteResult<()> {
        self.enter(Operation::Delete).await?;

        let old = {
            let mut tables = lock(&self.tables);
            let rows = tables
                .get_mut(table)
                .ok_or_else(|| RemoteError::not_found(table, id))?;
            let index = rows
                .iter()
                .position(|row| &row.id == id)
                .ok_or_else(|| RemoteError::not_found(table, id))?;
            rows.remove(index)
        };
        debug!("Deleted row {} from {}", id, table);

        self.publish(ChangeEvent::deleted(table, old));
        Ok(())
    }

    async fn subscribe(&self, table: &str) -> RemoteResult<Subscription> {
        self.enter(Operation::Subscribe).await?;

        let mut source = lock(&self.feeds)
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(self.feed_buffer).0)
            .subscribe();
        let (sender, receiver) = mpsc::channel(self.feed_buffer);
        let feed_table = table.to_string();

        let feed = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if sender.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Change feed for '{}' lagged, {} events skipped", feed_table, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        info!("Subscribed to change feed for '{}'", table);
        Ok(Subscription::new(table, receiver, feed))
    }

    async fn invoke(&self, function: &str, payload: Value) -> RemoteResult<Value> {
        self.enter(Operation::Invoke).await?;

        let handler = lock(&self.functions).get(function).cloned();
        match handler {
            Some(handler) => handler(payload),
            None => Err(RemoteError::Rejected {
                status: Some(404),
                message: format!("Function '{}' not found", function),
            }),
        }
    }
}
