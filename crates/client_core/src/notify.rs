use std::sync::Arc;

use anyhow::{anyhow, Result};
use shared::domain::Message;
use tracing::debug;

pub const NOTIFICATION_TITLE: &str = "New message";
pub const PHOTO_SUMMARY: &str = "Photo received";
pub const NOTIFY_PULSE_MS: &[u64] = &[200, 100, 200];

/// Vibration or any other tactile cue the host platform offers.
pub trait Haptics: Send + Sync {
    fn pulse(&self, pattern_ms: &[u64]) -> Result<()>;
}

pub trait SystemNotifier: Send + Sync {
    fn permission_granted(&self) -> bool;
    fn notify(&self, title: &str, body: &str) -> Result<()>;
}

pub struct NoopHaptics;

impl Haptics for NoopHaptics {
    fn pulse(&self, _pattern_ms: &[u64]) -> Result<()> {
        Err(anyhow!("haptics are unavailable"))
    }
}

pub struct NoopNotifier;

impl SystemNotifier for NoopNotifier {
    fn permission_granted(&self) -> bool {
        false
    }

    fn notify(&self, _title: &str, _body: &str) -> Result<()> {
        Err(anyhow!("system notifications are unavailable"))
    }
}

pub struct NotificationDispatcher {
    haptics: Arc<dyn Haptics>,
    notifier: Arc<dyn SystemNotifier>,
}

impl NotificationDispatcher {
    pub fn new(haptics: Arc<dyn Haptics>, notifier: Arc<dyn SystemNotifier>) -> Self {
        Self { haptics, notifier }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopHaptics), Arc::new(NoopNotifier))
    }

    /// Returns whether the message qualified for a notification. Platform
    /// failures are swallowed.
    pub fn dispatch(&self, message: &Message, local_user: Option<&str>) -> bool {
        if message.is_system || message.pending || local_user == Some(message.author.as_str()) {
            return false;
        }

        if let Err(err) = self.haptics.pulse(NOTIFY_PULSE_MS) {
            debug!(message_id = %message.id, "notify: haptic pulse skipped: {err}");
        }

        if self.notifier.permission_granted() {
            let body = format!("{}: {}", message.author, summarize(message));
            if let Err(err) = self.notifier.notify(NOTIFICATION_TITLE, &body) {
                debug!(message_id = %message.id, "notify: system notification skipped: {err}");
            }
        }
        true
    }
}

pub fn summarize(message: &Message) -> &str {
    if message.is_image() {
        PHOTO_SUMMARY
    } else {
        &message.text
    }
}

#[cfg(test)]
#[path = "tests/notify_tests.rs"]
mod tests;
