//! Live tables
//!
//! A `LiveTable` keeps an in-memory copy of the rows matching a descriptor
//! in step with the backend. It subscribes to the table's change feed before
//! the initial fetch, so writes landing while the fetch is in flight are
//! buffered and folded in afterwards rather than lost.
//!
//! Status moves `Idle -> FetchingInitial -> Synced`. Retargeting to another
//! descriptor tears the feed down and starts over; stopping or dropping the
//! table releases the feed.

use std::sync::Arc;

use log::{debug, info, warn};
use onemedi_core::table::decode_rows;
use onemedi_core::{
    Change, ChangeEvent, QueryDescriptor, Record, RemoteError, RemoteResult, Row, SharedBackend, Subscription,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::notify::{Notice, SharedNotifier};

/// Lifecycle of a live table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveStatus {
    /// Not started, stopped, or failed to start
    Idle,
    /// Subscribed and waiting for the initial rows
    FetchingInitial,
    /// Initial rows loaded, events being merged
    Synced,
}

/// Observable state of a live table
#[derive(Debug, Clone, PartialEq)]
pub struct LiveState<R> {
    /// Lifecycle status
    pub status: LiveStatus,
    /// Current rows
    pub rows: Vec<R>,
    /// Last start failure or feed closure
    pub error: Option<RemoteError>,
}

impl<R> Default for LiveState<R> {
    fn default() -> Self {
        LiveState {
            status: LiveStatus::Idle,
            rows: Vec::new(),
            error: None,
        }
    }
}

/// Fold one event into `rows`. Returns whether the rows changed.
///
/// Inserts of a known id and updates of an unknown id are upserts, so
/// replaying events already reflected in the initial fetch is harmless.
/// Updates that no longer match the descriptor drop the row; deletes of an
/// absent id do nothing. Rows that fail to decode are logged and skipped.
pub fn merge_event<R: Record>(rows: &mut Vec<R>, event: &ChangeEvent, descriptor: &QueryDescriptor) -> bool {
    if event.table != descriptor.table {
        return false;
    }

    match &event.change {
        Change::Insert { new } | Change::Update { new, .. } => {
            if !descriptor.matches(new) {
                return remove_row(rows, new);
            }
            match R::from_row(&new.project(&descriptor.select)) {
                Ok(record) => {
                    match rows.iter_mut().find(|r| r.id() == record.id()) {
                        Some(existing) => *existing = record,
                        None => rows.push(record),
                    }
                    true
                }
                Err(e) => {
                    warn!("Skipping {} event for row {}: {}", event.kind(), new.id, e);
                    false
                }
            }
        }
        Change::Delete { old } => remove_row(rows, old),
    }
}

fn remove_row<R: Record>(rows: &mut Vec<R>, row: &Row) -> bool {
    let before = rows.len();
    rows.retain(|r| r.id() != &row.id);
    rows.len() != before
}

/// Rows of one descriptor kept in step with the change feed
pub struct LiveTable<R: Record> {
    backend: SharedBackend,
    notifier: SharedNotifier,
    descriptor: QueryDescriptor,
    state: Arc<watch::Sender<LiveState<R>>>,
    pump: Option<JoinHandle<()>>,
}

impl<R: Record> LiveTable<R> {
    /// Idle live table for `descriptor`
    pub fn new(backend: SharedBackend, notifier: SharedNotifier, descriptor: QueryDescriptor) -> Self {
        LiveTable {
            backend,
            notifier,
            descriptor,
            state: Arc::new(watch::channel(LiveState::default()).0),
            pump: None,
        }
    }

    /// Subscribe, load the initial rows and start merging events.
    ///
    /// Calling `start` on a running table restarts it. On failure the feed
    /// is released, the status returns to `Idle` and a notice is raised.
    pub async fn start(&mut self) -> RemoteResult<()> {
        self.stop();
        self.state.send_modify(|state| {
            state.status = LiveStatus::FetchingInitial;
            state.error = None;
        });

        match self.sync().await {
            Ok(subscription) => {
                self.pump = Some(self.spawn_pump(subscription));
                Ok(())
            }
            Err(e) => {
                warn!("Live table on {} failed to start: {}", self.descriptor.table, e);
                self.state.send_modify(|state| {
                    state.status = LiveStatus::Idle;
                    state.error = Some(e.clone());
                });
                self.notifier
                    .notify(Notice::failure("Failed to load live data", &e));
                Err(e)
            }
        }
    }

    async fn sync(&self) -> RemoteResult<Subscription> {
        let mut subscription = self.backend.subscribe(&self.descriptor.table).await?;

        // Dropping `subscription` on the error path releases the feed.
        let rows = self.backend.select(&self.descriptor).await?;
        let mut rows = decode_rows::<R>(rows)?;

        let mut buffered = 0;
        while let Some(event) = subscription.try_next() {
            merge_event(&mut rows, &event, &self.descriptor);
            buffered += 1;
        }
        debug!(
            "Live table on {} loaded {} rows, {} buffered events applied",
            self.descriptor.table,
            rows.len(),
            buffered
        );

        self.state.send_modify(|state| {
            state.rows = rows;
            state.status = LiveStatus::Synced;
        });
        info!("Live table on {} synced", self.descriptor.table);
        Ok(subscription)
    }

    fn spawn_pump(&self, mut subscription: Subscription) -> JoinHandle<()> {
        let state = self.state.clone();
        let descriptor = self.descriptor.clone();

        tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                debug!("Merging {} event for row {}", event.kind(), event.row_id());
                state.send_if_modified(|live| merge_event(&mut live.rows, &event, &descriptor));
            }
            warn!("Change feed for '{}' closed", descriptor.table);
            state.send_modify(|live| {
                live.error = Some(RemoteError::FeedClosed(descriptor.table.clone()));
            });
        })
    }

    /// Switch to another descriptor; an equal descriptor is a no-op
    pub async fn retarget(&mut self, descriptor: QueryDescriptor) -> RemoteResult<()> {
        if descriptor == self.descriptor {
            return Ok(());
        }
        info!(
            "Live table retargeted from {} to {}",
            self.descriptor.table, descriptor.table
        );
        self.stop();
        self.state.send_modify(|state| state.rows.clear());
        self.descriptor = descriptor;
        self.start().await
    }

    /// Release the feed and go back to `Idle`; rows are kept
    pub fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            debug!("Live table on {} stopped", self.descriptor.table);
        }
        self.state.send_if_modified(|state| {
            let changed = state.status != LiveStatus::Idle;
            state.status = LiveStatus::Idle;
            changed
        });
    }

    /// Whether the feed is running
    pub fn is_running(&self) -> bool {
        self.pump.as_ref().map_or(false, |pump| !pump.is_finished())
    }

    /// Current descriptor
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    /// Lifecycle status
    pub fn status(&self) -> LiveStatus {
        self.state.borrow().status
    }

    /// Current rows
    pub fn rows(&self) -> Vec<R> {
        self.state.borrow().rows.clone()
    }

    /// Snapshot of the state
    pub fn state(&self) -> LiveState<R> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every change
    pub fn watch(&self) -> watch::Receiver<LiveState<R>> {
        self.state.subscribe()
    }
}

impl<R: Record> Drop for LiveTable<R> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use onemedi_core::memory::{MemoryBackend, Operation};
    use onemedi_core::models::{Order, OrderStatus};
    use onemedi_core::{RemoteBackend, RowId};
    use proptest::prelude::*;
    use serde_json::{json, Map, Value};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn row(id: &str, value: Value) -> Row {
        Row::new(id, fields(value))
    }

    fn live<R: Record>(backend: &Arc<MemoryBackend>, descriptor: QueryDescriptor) -> LiveTable<R> {
        let (notifier, _notices) = ChannelNotifier::new();
        LiveTable::new(backend.clone(), Arc::new(notifier), descriptor)
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_repeated_delete_is_a_no_op() {
        let descriptor = QueryDescriptor::new("orders");
        let mut rows = vec![row("o-1", json!({})), row("o-2", json!({}))];
        let delete = ChangeEvent::deleted("orders", row("o-1", json!({})));

        assert!(merge_event(&mut rows, &delete, &descriptor));
        assert_eq!(rows.len(), 1);
        assert!(!merge_event(&mut rows, &delete, &descriptor));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id.as_str(), "o-2");
    }

    #[tokio::test]
    async fn test_feed_rows_are_projected_like_fetched_rows() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed_json(json!({
                "orders": [{"id": "o-1", "user_id": "u-1", "status": "pending", "total_amount": 135.0}]
            }))
            .unwrap();
        let descriptor = QueryDescriptor::new("orders").select(["status"]);
        let mut table: LiveTable<Row> = live(&backend, descriptor);
        table.start().await.unwrap();
        assert_eq!(table.rows(), vec![row("o-1", json!({"status": "pending"}))]);

        backend
            .update("orders", &RowId::new("o-1"), fields(json!({"status": "confirmed"})))
            .await
            .unwrap();
        let inserted = backend
            .insert("orders", fields(json!({"user_id": "u-2", "status": "pending", "total_amount": 80.0})))
            .await
            .unwrap();

        wait_until(|| table.rows().len() == 2).await;
        let rows = table.rows();
        assert_eq!(rows[0], row("o-1", json!({"status": "confirmed"})));
        assert_eq!(rows[1], row(inserted.id.as_str(), json!({"status": "pending"})));
    }

    #[test]
    fn test_merge_respects_descriptor() {
        let descriptor = QueryDescriptor::new("orders").filter_eq("status", "pending");
        let mut rows: Vec<Row> = Vec::new();

        let other_table = ChangeEvent::inserted("cart_items", row("c-1", json!({"status": "pending"})));
        assert!(!merge_event(&mut rows, &other_table, &descriptor));

        let shipped = ChangeEvent::inserted("orders", row("o-1", json!({"status": "shipped"})));
        assert!(!merge_event(&mut rows, &shipped, &descriptor));

        let pending = row("o-2", json!({"status": "pending"}));
        assert!(merge_event(&mut rows, &ChangeEvent::inserted("orders", pending.clone()), &descriptor));

        // Leaving the filter removes the row
        let moved = ChangeEvent::updated("orders", pending, row("o-2", json!({"status": "confirmed"})));
        assert!(merge_event(&mut rows, &moved, &descriptor));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_undecodable_rows_are_skipped() {
        let descriptor = QueryDescriptor::new("orders");
        let mut orders: Vec<Order> = Vec::new();
        let bad = ChangeEvent::inserted("orders", row("o-1", json!({"status": "teleported"})));
        assert!(!merge_event(&mut orders, &bad, &descriptor));
        assert!(orders.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, i64),
        Update(u8, i64),
        Delete(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, any::<i64>()).prop_map(|(id, v)| Op::Insert(id, v)),
            (0u8..6, any::<i64>()).prop_map(|(id, v)| Op::Update(id, v)),
            (0u8..6).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn merge_matches_keyed_model(ops in proptest::collection::vec(op(), 0..40)) {
            let descriptor = QueryDescriptor::new("orders");
            let mut rows: Vec<Row> = Vec::new();
            let mut model: BTreeMap<String, i64> = BTreeMap::new();

            for op in ops {
                let event = match op {
                    Op::Insert(id, v) => {
                        model.insert(format!("o-{}", id), v);
                        ChangeEvent::inserted("orders", row(&format!("o-{}", id), json!({"v": v})))
                    }
                    Op::Update(id, v) => {
                        model.insert(format!("o-{}", id), v);
                        let id = format!("o-{}", id);
                        ChangeEvent::updated("orders", row(&id, json!({})), row(&id, json!({"v": v})))
                    }
                    Op::Delete(id) => {
                        model.remove(&format!("o-{}", id));
                        ChangeEvent::deleted("orders", row(&format!("o-{}", id), json!({})))
                    }
                };
                merge_event(&mut rows, &event, &descriptor);
            }

            let merged: BTreeMap<String, i64> = rows
                .iter()
                .map(|r| (r.id.to_string(), r.get("v").and_then(Value::as_i64).unwrap()))
                .collect();
            prop_assert_eq!(rows.len(), merged.len());
            prop_assert_eq!(merged, model);
        }
    }

    #[tokio::test]
    async fn test_start_merges_live_events() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("orders", vec![row("o-1", json!({"user_id": "u-1", "status": "pending", "total_amount": 120.0}))]);

        let mut orders: LiveTable<Order> = live(&backend, QueryDescriptor::new("orders"));
        assert_eq!(orders.status(), LiveStatus::Idle);
        orders.start().await.unwrap();
        assert_eq!(orders.status(), LiveStatus::Synced);
        assert_eq!(orders.rows().len(), 1);

        let created = backend
            .insert("orders", fields(json!({"user_id": "u-2", "status": "pending", "total_amount": 80.0})))
            .await
            .unwrap();
        backend
            .update("orders", &RowId::new("o-1"), fields(json!({"status": "shipped"})))
            .await
            .unwrap();
        wait_until(|| {
            orders.rows().len() == 2 && orders.rows()[0].status == OrderStatus::Shipped
        })
        .await;

        backend.delete("orders", &created.id).await.unwrap();
        wait_until(|| orders.rows().len() == 1).await;
        assert_eq!(orders.rows()[0].id.as_str(), "o-1");
    }

    #[tokio::test]
    async fn test_writes_during_initial_fetch_are_not_lost() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("orders", vec![row("o-1", json!({"status": "pending"}))]);
        backend.delay_next(Operation::Select, Duration::from_millis(100));

        let writer = {
            let backend = backend.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                backend.insert("orders", fields(json!({"status": "pending"}))).await.unwrap();
                backend
                    .update("orders", &RowId::new("o-1"), fields(json!({"status": "confirmed"})))
                    .await
                    .unwrap();
            })
        };

        let mut orders: LiveTable<Row> = live(&backend, QueryDescriptor::new("orders"));
        orders.start().await.unwrap();
        writer.await.unwrap();

        wait_until(|| orders.rows().len() == 2).await;
        let rows = orders.rows();
        let first = rows.iter().find(|r| r.id.as_str() == "o-1").unwrap();
        assert_eq!(first.get_str("status"), Some("confirmed"));
    }

    #[tokio::test]
    async fn test_failed_start_releases_feed() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next(Operation::Select, RemoteError::rejected("permission denied for table orders"));

        let mut orders: LiveTable<Row> = live(&backend, QueryDescriptor::new("orders"));
        let err = orders.start().await.unwrap_err();

        assert_eq!(err, RemoteError::rejected("permission denied for table orders"));
        assert_eq!(orders.status(), LiveStatus::Idle);
        assert_eq!(orders.state().error, Some(err));
        assert!(!orders.is_running());
        wait_until(|| backend.subscriber_count("orders") == 0).await;
    }

    #[tokio::test]
    async fn test_stop_retarget_and_drop_release_feeds() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("orders", vec![row("o-1", json!({}))]);
        backend.seed("cart_items", vec![row("c-1", json!({})), row("c-2", json!({}))]);

        let mut live_rows: LiveTable<Row> = live(&backend, QueryDescriptor::new("orders"));
        live_rows.start().await.unwrap();
        assert_eq!(backend.subscriber_count("orders"), 1);

        live_rows.retarget(QueryDescriptor::new("orders")).await.unwrap();
        assert_eq!(backend.subscriber_count("orders"), 1);

        live_rows.retarget(QueryDescriptor::new("cart_items")).await.unwrap();
        assert_eq!(live_rows.status(), LiveStatus::Synced);
        assert_eq!(live_rows.rows().len(), 2);
        wait_until(|| backend.subscriber_count("orders") == 0).await;
        assert_eq!(backend.subscriber_count("cart_items"), 1);

        live_rows.stop();
        assert_eq!(live_rows.status(), LiveStatus::Idle);
        assert_eq!(live_rows.rows().len(), 2);
        wait_until(|| backend.subscriber_count("cart_items") == 0).await;

        live_rows.start().await.unwrap();
        assert_eq!(backend.subscriber_count("cart_items"), 1);
        drop(live_rows);
        wait_until(|| backend.subscriber_count("cart_items") == 0).await;
    }
}
