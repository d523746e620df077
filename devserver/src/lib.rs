//! # ONE MEDI development server
//!
//! Serves the in-memory store over the same REST, function and change-feed
//! routes as the hosted backend so the client crate can be exercised locally.

pub mod api;
pub mod settings;

use std::sync::Arc;

use anyhow::Context;
use onemedi_core::MemoryBackend;
use serde_json::{json, Value};

pub use api::{create_router, AppState};
pub use settings::Settings;

/// Build the server state from settings, loading the seed file if one is set
pub fn build_state(settings: &Settings) -> anyhow::Result<Arc<AppState>> {
    let backend = Arc::new(MemoryBackend::with_feed_buffer(settings.feed_buffer));

    if let Some(path) = &settings.seed_file {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading seed file {}", path))?;
        let seed: Value = serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path))?;
        backend.seed_json(seed)?;
        tracing::info!("Loaded seed data from {}", path);
    }

    backend.register_function("echo", |payload| Ok(json!({ "echo": payload })));

    Ok(Arc::new(AppState {
        backend,
        api_key: settings.api_key.clone(),
    }))
}
