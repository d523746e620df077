//! Timing utilities
//!
//! `RequestTimer` measures one backend call and logs its duration when it is
//! dropped, so early returns through `?` are timed too.

use std::time::{Duration, Instant};
use log::{debug, warn};

/// Default threshold above which a request is logged as slow
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(1500);

/// Timer for one backend request
#[derive(Debug, Clone)]
pub struct RequestTimer {
    /// Operation label, e.g. `select orders`
    label: String,

    /// Start time
    start: Instant,

    /// Requests slower than this are logged at warn level
    slow_threshold: Duration,

    /// Whether to log automatically on drop
    log_on_drop: bool,
}

impl RequestTimer {
    /// Start timing an operation
    pub fn start(label: impl Into<String>) -> Self {
        RequestTimer {
            label: label.into(),
            start: Instant::now(),
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
            log_on_drop: true,
        }
    }

    /// Set the slow-request threshold
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Disable automatic logging on drop
    pub fn without_auto_log(mut self) -> Self {
        self.log_on_drop = false;
        self
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Check if the request has exceeded the slow threshold
    pub fn is_slow(&self) -> bool {
        self.elapsed() > self.slow_threshold
    }

    /// Log the elapsed time at a level matching the threshold
    pub fn log(&self) {
        let elapsed = self.elapsed();
        if self.is_slow() {
            warn!("{} took {:?} [SLOW]", self.label, elapsed);
        } else {
            debug!("{} took {:?}", self.label, elapsed);
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        if self.log_on_drop {
            self.log();
        }
    }
}
