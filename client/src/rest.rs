//! REST backend
//!
//! Implements `RemoteBackend` against the hosted service's REST surface:
//! `/rest/v1/{table}` for rows, `/functions/v1/{name}` for server-side
//! functions and `/realtime/v1/{table}` for change feeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use onemedi_core::backend::{RemoteBackend, Subscription};
use onemedi_core::config::{BackendConfig, CoreConfig};
use onemedi_core::error::{RemoteError, RemoteResult};
use onemedi_core::identity::IdentityProvider;
use onemedi_core::models::{Row, RowId};
use onemedi_core::query::{encode_filter, Filter, QueryDescriptor};
use onemedi_core::utils::RequestTimer;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::feed::FeedListener;

/// Backend reached over HTTP
pub struct RestBackend {
    /// Base URL, without trailing slash
    base_url: String,

    /// Public API key
    api_key: String,

    /// HTTP client
    client: Client,

    /// Timeout for requests
    timeout: Duration,

    /// Delay between feed reconnect attempts
    reconnect_delay: Duration,

    /// Per-subscription channel capacity
    feed_buffer: usize,

    /// Threshold for slow-request logging
    slow_threshold: Duration,

    /// Source of the bearer token
    identity: Option<Arc<dyn IdentityProvider>>,

    /// Log every response status at info level
    trace_requests: bool,
}

impl RestBackend {
    /// Create a backend from configuration
    pub fn new(config: &BackendConfig) -> RemoteResult<Self> {
        let base_url = config.url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RemoteError::Config(format!(
                "backend url must be http(s), got '{}'",
                config.url
            )));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| RemoteError::Config(e.to_string()))?;

        Ok(RestBackend {
            base_url,
            api_key: config.api_key.clone(),
            client,
            timeout: config.request_timeout,
            reconnect_delay: config.reconnect_delay,
            feed_buffer: config.feed_buffer.max(1),
            slow_threshold: config.slow_request_threshold,
            identity: None,
            trace_requests: false,
        })
    }

    /// Create a backend from the full client configuration.
    ///
    /// The configuration is validated first; debug mode logs every response.
    pub fn from_config(config: &CoreConfig) -> RemoteResult<Self> {
        config.validate().map_err(|e| RemoteError::Config(e.to_string()))?;
        let mut backend = Self::new(&config.backend)?;
        backend.trace_requests = config.debug_mode;
        Ok(backend)
    }

    /// Send the signed-in user's token instead of the API key
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the timeout for requests
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Base URL requests go to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> RemoteResult<String> {
        Ok(format!("{}/rest/v1/{}", self.base_url, path_segment("table", table)?))
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", value);
        }

        let token = self
            .identity
            .as_ref()
            .and_then(|identity| identity.access_token())
            .unwrap_or_else(|| self.api_key.clone());
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    fn timer(&self, label: String) -> RequestTimer {
        RequestTimer::start(label).with_slow_threshold(self.slow_threshold)
    }

    /// Send a request and turn non-success statuses into errors
    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .headers(self.headers())
            .timeout(self.timeout)
            .send()
            .await?;

        if self.trace_requests {
            info!("{} -> {}", response.url(), response.status());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            return Err(TransportError::from_body(status, &body));
        }

        Ok(response)
    }

    /// Rows from a response body; a single object counts as one row
    async fn read_rows(response: Response) -> Result<Vec<Row>, TransportError> {
        let value: Value = response.json().await?;
        let rows = match value {
            Value::Array(_) => serde_json::from_value(value)?,
            Value::Object(_) => vec![serde_json::from_value(value)?],
            Value::Null => Vec::new(),
            other => {
                return Err(TransportError::Json(serde::de::Error::custom(format!(
                    "expected rows, got {}",
                    other
                ))))
            }
        };
        Ok(rows)
    }

    fn id_filter(id: &RowId) -> (String, String) {
        (
            "id".to_string(),
            encode_filter(&Filter::Eq(Value::String(id.to_string()))),
        )
    }
}

// Table and function names go into the URL path unescaped, so only plain
// identifiers are accepted.
fn path_segment<'a>(kind: &str, name: &'a str) -> RemoteResult<&'a str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(name)
    } else {
        Err(RemoteError::Validation(format!("invalid {} name '{}'", kind, name)))
    }
}

#[async_trait]
impl RemoteBackend for RestBackend {
    async fn select(&self, query: &QueryDescriptor) -> RemoteResult<Vec<Row>> {
        let _timer = self.timer(format!("select {}", query.table));
        let pairs = query.to_query_pairs();
        let url = self.table_url(&query.table)?;
        debug!("GET {} {:?}", url, pairs);

        let request = self.client.get(url).query(&pairs);
        let response = self.send(request).await?;
        Ok(Self::read_rows(response).await?)
    }

    async fn insert(&self, table: &str, fields: Map<String, Value>) -> RemoteResult<Row> {
        let _timer = self.timer(format!("insert {}", table));
        let request = self
            .client
            .post(self.table_url(table)?)
            .header("prefer", "return=representation")
            .json(&fields);
        let response = self.send(request).await?;

        Self::read_rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Decode(format!("insert into {} returned no row", table)))
    }

    async fn update(&self, table: &str, id: &RowId, fields: Map<String, Value>) -> RemoteResult<Row> {
        let _timer = self.timer(format!("update {}", table));
        let request = self
            .client
            .patch(self.table_url(table)?)
            .query(&[Self::id_filter(id)])
            .header("prefer", "return=representation")
            .json(&fields);
        let response = self.send(request).await?;

        Self::read_rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::not_found(table, id))
    }

    async fn delete(&self, table: &str, id: &RowId) -> RemoteResult<()> {
        let _timer = self.timer(format!("delete {}", table));
        let request = self
            .client
            .delete(self.table_url(table)?)
            .query(&[Self::id_filter(id)])
            .header("prefer", "return=representation");
        let response = self.send(request).await?;

        if Self::read_rows(response).await?.is_empty() {
            return Err(RemoteError::not_found(table, id));
        }
        Ok(())
    }

    async fn subscribe(&self, table: &str) -> RemoteResult<Subscription> {
        let listener = FeedListener::new(
            self.client.clone(),
            format!("{}/realtime/v1/{}", self.base_url, path_segment("table", table)?),
            self.headers(),
            table,
            self.reconnect_delay,
        );

        // The first connection is made here so a refused feed fails the call
        // and events written after `subscribe` returns are not missed.
        let response = listener.connect().await?;
        let (sender, receiver) = mpsc::channel(self.feed_buffer);
        let feed = tokio::spawn(listener.run(response, sender));

        info!("Subscribed to change feed for '{}'", table);
        Ok(Subscription::new(table, receiver, feed))
    }

    async fn invoke(&self, function: &str, payload: Value) -> RemoteResult<Value> {
        let _timer = self.timer(format!("invoke {}", function));
        let url = format!("{}/functions/v1/{}", self.base_url, path_segment("function", function)?);
        let response = self.send(self.client.post(url).json(&payload)).await?;

        let body = response.text().await.map_err(TransportError::from)?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}
