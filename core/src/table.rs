//! Table-bound clients
//!
//! `TableClient` is a capability object for one remote table over untyped
//! rows. `TypedTable` layers a `TableRecord` on top and validates every row
//! it hands out.

use std::marker::PhantomData;

use log::debug;
use serde_json::{Map, Value};

use crate::backend::{SharedBackend, Subscription, SubscriptionHandle};
use crate::error::{RemoteError, RemoteResult};
use crate::models::{ChangeEvent, Record, Row, RowId, TableRecord};
use crate::query::QueryDescriptor;

/// Client bound to one table
#[derive(Clone)]
pub struct TableClient {
    backend: SharedBackend,
    table: String,
}

impl TableClient {
    /// Bind a backend to a table
    pub fn new(backend: SharedBackend, table: impl Into<String>) -> Self {
        TableClient {
            backend,
            table: table.into(),
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.table
    }

    /// Backend this table talks to
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Empty descriptor for this table, to refine with the builder methods
    pub fn query(&self) -> QueryDescriptor {
        QueryDescriptor::new(self.table.clone())
    }

    /// Rows matching the descriptor
    pub async fn get_all(&self, query: &QueryDescriptor) -> RemoteResult<Vec<Row>> {
        if query.table != self.table {
            return Err(RemoteError::Config(format!(
                "query for '{}' issued through the '{}' table client",
                query.table, self.table
            )));
        }
        let rows = self.backend.select(query).await?;
        debug!("Fetched {} rows from {}", rows.len(), self.table);
        Ok(rows)
    }

    /// One row by id
    pub async fn get(&self, id: &RowId) -> RemoteResult<Option<Row>> {
        let query = self.query().filter_eq("id", id.as_str()).limit(1);
        Ok(self.backend.select(&query).await?.into_iter().next())
    }

    /// Insert a row
    pub async fn create(&self, fields: Map<String, Value>) -> RemoteResult<Row> {
        self.backend.insert(&self.table, fields).await
    }

    /// Update fields of a row
    pub async fn update(&self, id: &RowId, fields: Map<String, Value>) -> RemoteResult<Row> {
        self.backend.update(&self.table, id, fields).await
    }

    /// Delete a row
    pub async fn delete(&self, id: &RowId) -> RemoteResult<()> {
        self.backend.delete(&self.table, id).await
    }

    /// Rows where any of `fields` contains `query`, ignoring case.
    ///
    /// A blank query returns every row.
    pub async fn search<I, S>(&self, query: &str, fields: I) -> RemoteResult<Vec<Row>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let descriptor = self.query().search(query, fields);
        self.backend.select(&descriptor).await
    }

    /// Raw change feed for this table
    pub async fn changes(&self) -> RemoteResult<Subscription> {
        self.backend.subscribe(&self.table).await
    }

    /// Call `handler` once per change event until the handle is dropped
    pub async fn subscribe<F>(&self, handler: F) -> RemoteResult<SubscriptionHandle>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let subscription = self.changes().await?;
        Ok(SubscriptionHandle::spawn(subscription, handler))
    }

    /// Typed view of this table
    pub fn typed<R: TableRecord>(backend: SharedBackend) -> TypedTable<R> {
        TypedTable::new(backend)
    }
}

/// Client for a table with a typed record
pub struct TypedTable<R: TableRecord> {
    inner: TableClient,
    _record: PhantomData<fn() -> R>,
}

impl<R: TableRecord> Clone for TypedTable<R> {
    fn clone(&self) -> Self {
        TypedTable {
            inner: self.inner.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: TableRecord> TypedTable<R> {
    /// Bind a backend to `R::TABLE`
    pub fn new(backend: SharedBackend) -> Self {
        TypedTable {
            inner: TableClient::new(backend, R::TABLE),
            _record: PhantomData,
        }
    }

    /// Untyped client for the same table
    pub fn untyped(&self) -> &TableClient {
        &self.inner
    }

    /// Empty descriptor for this table
    pub fn query(&self) -> QueryDescriptor {
        self.inner.query()
    }

    /// Records matching the descriptor
    pub async fn get_all(&self, query: &QueryDescriptor) -> RemoteResult<Vec<R>> {
        decode_rows(self.inner.get_all(query).await?)
    }

    /// One record by id
    pub async fn get(&self, id: &RowId) -> RemoteResult<Option<R>> {
        self.inner.get(id).await?.map(|row| R::from_row(&row)).transpose()
    }

    /// Insert a record
    pub async fn create(&self, fields: Map<String, Value>) -> RemoteResult<R> {
        R::from_row(&self.inner.create(fields).await?)
    }

    /// Update fields of a record
    pub async fn update(&self, id: &RowId, fields: Map<String, Value>) -> RemoteResult<R> {
        R::from_row(&self.inner.update(id, fields).await?)
    }

    /// Delete a record
    pub async fn delete(&self, id: &RowId) -> RemoteResult<()> {
        self.inner.delete(id).await
    }

    /// Search records
    pub async fn search<I, S>(&self, query: &str, fields: I) -> RemoteResult<Vec<R>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        decode_rows(self.inner.search(query, fields).await?)
    }
}

/// Decode and validate a batch of rows
pub fn decode_rows<R: Record>(rows: Vec<Row>) -> RemoteResult<Vec<R>> {
    rows.iter().map(R::from_row).collect()
}
