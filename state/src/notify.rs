//! User-facing notifications
//!
//! Handles raise one notice per settled operation. Where the notice ends up
//! (a toast, a log line, a test channel) is up to the `Notifier`.

use std::sync::Arc;

use log::{error, info};
use onemedi_core::RemoteError;
use tokio::sync::mpsc;

/// Notice severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// The operation succeeded
    Success,
    /// The operation failed
    Error,
}

/// One notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity
    pub level: NoticeLevel,
    /// Short headline
    pub title: String,
    /// Body text
    pub message: String,
}

impl Notice {
    /// Success notice
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Success,
            title: title.into(),
            message: message.into(),
        }
    }

    /// Failure notice carrying the error's user-facing text
    pub fn failure(title: impl Into<String>, error: &RemoteError) -> Self {
        Notice {
            level: NoticeLevel::Error,
            title: title.into(),
            message: error.user_message(),
        }
    }

    /// Whether this is a failure notice
    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }
}

/// Sink for notices
pub trait Notifier: Send + Sync {
    /// Deliver a notice
    fn notify(&self, notice: Notice);
}

/// Notifier shared by handles
pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notices to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Success => info!("{}: {}", notice.title, notice.message),
            NoticeLevel::Error => error!("{}: {}", notice.title, notice.message),
        }
    }
}

/// Forwards notices to a channel, for UI event loops
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    /// Notifier and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelNotifier { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        // A closed receiver means nobody shows notices anymore.
        let _ = self.sender.send(notice);
    }
}
