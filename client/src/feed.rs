//! Change-feed listener
//!
//! A feed is a long-lived `GET /realtime/v1/{table}` response carrying one
//! JSON change event per line. The listener forwards decoded events to the
//! subscription channel and reconnects after a delay when the stream ends or
//! fails. It stops once the subscription side is gone.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::TryStreamExt;
use log::{debug, error, info, warn};
use onemedi_core::ChangeEvent;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Why a single connection stopped
#[derive(Debug, PartialEq, Eq)]
enum FeedEnd {
    /// The server closed the stream
    StreamEnded,
    /// Nobody is listening anymore
    ReceiverClosed,
}

/// Listens to one table's change feed
#[derive(Debug, Clone)]
pub struct FeedListener {
    client: Client,
    url: String,
    headers: HeaderMap,
    table: String,
    reconnect_delay: Duration,
}

impl FeedListener {
    /// Create a listener for `url`
    pub fn new(
        client: Client,
        url: String,
        headers: HeaderMap,
        table: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        FeedListener {
            client,
            url,
            headers,
            table: table.into(),
            reconnect_delay,
        }
    }

    /// Table this listener follows
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Open the stream
    pub async fn connect(&self) -> Result<Response, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .header("accept", "application/x-ndjson")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_body(status, &body));
        }

        Ok(response)
    }

    /// Run the listener loop starting from an already open stream
    pub async fn run(self, initial: Response, sender: mpsc::Sender<ChangeEvent>) {
        let mut pending = Some(initial);

        loop {
            let response = match pending.take() {
                Some(response) => response,
                None => match self.connect().await {
                    Ok(response) => {
                        info!("Change feed for '{}' reconnected", self.table);
                        response
                    }
                    Err(e) => {
                        error!("Change feed for '{}' could not reconnect: {}", self.table, e);
                        if sender.is_closed() {
                            return;
                        }
                        tokio::time::sleep(self.reconnect_delay).await;
                        continue;
                    }
                },
            };

            match self.listen(response, &sender).await {
                Ok(FeedEnd::ReceiverClosed) => {
                    debug!("Change feed for '{}' has no receiver, stopping", self.table);
                    return;
                }
                Ok(FeedEnd::StreamEnded) => {
                    warn!("Change feed for '{}' ended unexpectedly. Attempting to reconnect...", self.table);
                }
                Err(e) => {
                    error!(
                        "Change feed for '{}' failed: {}. Attempting to reconnect after delay...",
                        self.table, e
                    );
                }
            }

            if sender.is_closed() {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn listen(
        &self,
        response: Response,
        sender: &mpsc::Sender<ChangeEvent>,
    ) -> Result<FeedEnd, TransportError> {
        let mut stream = Box::pin(response.bytes_stream());
        let mut lines = LineDecoder::default();

        while let Some(chunk) = stream.try_next().await? {
            for line in lines.push(&chunk) {
                if let Some(event) = self.decode(&line) {
                    if sender.send(event).await.is_err() {
                        return Ok(FeedEnd::ReceiverClosed);
                    }
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(event) = self.decode(&line) {
                if sender.send(event).await.is_err() {
                    return Ok(FeedEnd::ReceiverClosed);
                }
            }
        }

        Ok(FeedEnd::StreamEnded)
    }

    /// Decode one line; blank keep-alive lines and malformed events yield `None`
    fn decode(&self, line: &[u8]) -> Option<ChangeEvent> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim(),
            Err(e) => {
                warn!("Skipping non-UTF-8 change event on '{}': {}", self.table, e);
                return None;
            }
        };
        if text.is_empty() {
            return None;
        }

        match serde_json::from_str::<ChangeEvent>(text) {
            Ok(event) if event.table == self.table => Some(event),
            Ok(event) => {
                debug!("Ignoring event for '{}' on the '{}' feed", event.table, self.table);
                None
            }
            Err(e) => {
                warn!("Skipping malformed change event on '{}': {}", self.table, e);
                None
            }
        }
    }
}

/// Splits a byte stream into newline-terminated lines
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    /// Append a chunk and return every completed line
    fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            lines.push(line.freeze());
        }
        lines
    }

    /// Unterminated trailing data, if any
    fn finish(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onemedi_core::Row;
    use serde_json::{json, Map};

    fn listener() -> FeedListener {
        FeedListener::new(
            Client::new(),
            "http://127.0.0.1:9/realtime/v1/orders".to_string(),
            HeaderMap::new(),
            "orders",
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_line_decoder_handles_split_chunks() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"{\"a\":").is_empty());

        let lines = decoder.push(b"1}\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines.len(), 2);
        assert_eq!(&lines[0][..], b"{\"a\":1}");
        assert_eq!(&lines[1][..], b"{\"b\":2}");

        assert_eq!(decoder.finish().as_deref(), Some(&b"{\"c\""[..]));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decode_skips_blank_malformed_and_foreign_lines() {
        let listener = listener();
        let event = ChangeEvent::inserted("orders", Row::new("o-1", Map::new()));
        let line = serde_json::to_vec(&event).unwrap();

        assert_eq!(listener.decode(&line), Some(event));
        assert_eq!(listener.decode(b"   "), None);
        assert_eq!(listener.decode(b"{not json"), None);
        assert_eq!(listener.decode(br#"{"table":"orders","type":"TRUNCATE"}"#), None);

        let foreign = json!({"table": "cart_items", "type": "DELETE", "old": {"id": "c-1"}});
        assert_eq!(listener.decode(foreign.to_string().as_bytes()), None);
    }
}
