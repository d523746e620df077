//! Utility functions and helpers

pub mod timer;

pub use timer::RequestTimer;

use chrono::Utc;
use uuid::Uuid;

/// Generate a row identifier
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as an RFC 3339 string, the timestamp format rows carry
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
