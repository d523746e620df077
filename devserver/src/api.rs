//! REST, function and change-feed routes over the in-memory store
//!
//! Mirrors the hosted backend's wire contract closely enough for
//! `RestBackend` to run against it unchanged.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::stream;
use onemedi_core::{MemoryBackend, QueryDescriptor, RemoteBackend, RemoteError, Row, RowId, Subscription};
use serde_json::{json, Map, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared state of the development server
pub struct AppState {
    /// Backing store
    pub backend: Arc<MemoryBackend>,

    /// Key required in the `apikey` header, if any
    pub api_key: Option<String>,
}

/// Error response carrying a `{"message": ...}` body
#[derive(Debug)]
pub struct ApiError(pub RemoteError);

impl From<RemoteError> for ApiError {
    fn from(err: RemoteError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RemoteError::Rejected { status, .. } => status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_REQUEST),
            RemoteError::NotFound { .. } => StatusCode::NOT_FOUND,
            RemoteError::Validation(_) | RemoteError::Decode(_) => StatusCode::BAD_REQUEST,
            RemoteError::Unauthenticated => StatusCode::UNAUTHORIZED,
            RemoteError::Network(_) | RemoteError::FeedClosed(_) => StatusCode::BAD_GATEWAY,
            RemoteError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }
        // Rejections keep the store's wording
        let message = match self.0 {
            RemoteError::Rejected { message, .. } => message,
            other => other.to_string(),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Create the router serving `state`
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/rest/v1/:table",
            get(select_rows)
                .post(insert_rows)
                .patch(update_row)
                .delete(delete_row),
        )
        .route("/functions/v1/:name", post(invoke_function))
        .route("/realtime/v1/:table", get(change_feed))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "tables": state.backend.table_names(),
    }))
}

async fn require_api_key(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        let presented = request.headers().get("apikey").and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_str()) {
            tracing::warn!("Refused {} {}: bad api key", request.method(), request.uri().path());
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Invalid API key" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

// Writes address exactly one row through `id=eq.<id>`.
fn target(table: String, pairs: Vec<(String, String)>) -> ApiResult<(QueryDescriptor, RowId)> {
    let descriptor = QueryDescriptor::from_query_pairs(table, pairs)?;
    let id = descriptor
        .target_id()
        .ok_or_else(|| RemoteError::Validation("writes must filter on id=eq.<id>".to_string()))?;
    Ok((descriptor, id))
}

async fn select_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Row>>> {
    let descriptor = QueryDescriptor::from_query_pairs(table, pairs)?;
    let rows = state.backend.select(&descriptor).await?;
    tracing::debug!("Selected {} rows from {}", rows.len(), descriptor.table);
    Ok(Json(rows))
}

async fn insert_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Vec<Row>>)> {
    let batch: Vec<Map<String, Value>> = match body {
        Value::Object(fields) => vec![fields],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(fields) => Ok(fields),
                other => Err(RemoteError::Validation(format!("expected a row object, got {}", other))),
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(RemoteError::Validation(format!("expected a row object, got {}", other)).into());
        }
    };

    let mut inserted = Vec::with_capacity(batch.len());
    for fields in batch {
        inserted.push(state.backend.insert(&table, fields).await?);
    }
    tracing::info!("Inserted {} rows into {}", inserted.len(), table);
    Ok((StatusCode::CREATED, Json(inserted)))
}

async fn update_row(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    Json(fields): Json<Map<String, Value>>,
) -> ApiResult<Json<Vec<Row>>> {
    let (_, id) = target(table.clone(), pairs)?;
    match state.backend.update(&table, &id, fields).await {
        Ok(row) => Ok(Json(vec![row])),
        // An unmatched filter selects nothing
        Err(RemoteError::NotFound { .. }) => Ok(Json(Vec::new())),
        Err(err) => Err(err.into()),
    }
}

async fn delete_row(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Row>>> {
    let (descriptor, id) = target(table.clone(), pairs)?;
    let existing = state.backend.select(&descriptor).await?;
    if existing.is_empty() {
        return Ok(Json(Vec::new()));
    }
    match state.backend.delete(&table, &id).await {
        Ok(()) => Ok(Json(existing)),
        Err(RemoteError::NotFound { .. }) => Ok(Json(Vec::new())),
        Err(err) => Err(err.into()),
    }
}

async fn invoke_function(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let result = state.backend.invoke(&name, payload).await?;
    Ok(Json(result))
}

async fn change_feed(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> ApiResult<Response> {
    let subscription = state.backend.subscribe(&table).await?;
    tracing::info!("Change feed opened for {}", table);

    let lines = stream::unfold(subscription, next_line);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/x-ndjson"),
    );
    Ok((headers, Body::from_stream(lines)).into_response())
}

// One NDJSON line per change event; the stream ends with the feed.
async fn next_line(mut subscription: Subscription) -> Option<(Result<String, Infallible>, Subscription)> {
    loop {
        let event = subscription.next().await?;
        match serde_json::to_string(&event) {
            Ok(mut line) => {
                line.push('\n');
                return Some((Ok(line), subscription));
            }
            Err(err) => tracing::warn!("Skipping unencodable {} event: {}", event.kind(), err),
        }
    }
}
