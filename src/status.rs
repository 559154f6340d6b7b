//! Transient user-facing status messages.
//!
//! User-actionable conditions (cannot complete an empty collection, cannot
//! group an annotation into itself, ...) are reported here instead of being
//! raised as errors, so a malformed action never interrupts the interactive
//! session. Messages auto-expire after a short interval; the UI collaborator
//! drains [`StatusLog::active`] each frame.

use web_time::{Duration, Instant};

/// Default lifetime of a transient message.
pub const TRANSIENT_TTL: Duration = Duration::from_secs(3);

/// A single timed status message.
#[derive(Debug, Clone)]
pub struct StatusMessage {
    /// Message text shown to the user.
    pub text: String,
    created: Instant,
    ttl: Duration,
}

impl StatusMessage {
    /// Whether the message has outlived its ttl.
    pub fn is_expired(&self) -> bool {
        self.created.elapsed() >= self.ttl
    }
}

/// Sink for transient status messages.
#[derive(Debug, Default)]
pub struct StatusLog {
    messages: Vec<StatusMessage>,
}

impl StatusLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a message with the default 3 second lifetime.
    pub fn transient(&mut self, text: impl Into<String>) {
        self.transient_with_ttl(text, TRANSIENT_TTL);
    }

    /// Post a message with an explicit lifetime.
    pub fn transient_with_ttl(&mut self, text: impl Into<String>, ttl: Duration) {
        let text = text.into();
        log::info!("status: {text}");
        self.messages.push(StatusMessage {
            text,
            created: Instant::now(),
            ttl,
        });
    }

    /// Drop expired messages.
    pub fn sweep(&mut self) {
        self.messages.retain(|m| !m.is_expired());
    }

    /// Currently visible messages, oldest first.
    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|m| !m.is_expired())
            .map(|m| m.text.as_str())
    }

    /// The most recent message, expired or not. Mostly for tests.
    pub fn latest(&self) -> Option<&str> {
        self.messages.last().map(|m| m.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_sweep() {
        let mut log = StatusLog::new();
        log.transient("kept");
        log.transient_with_ttl("gone", Duration::ZERO);
        assert_eq!(log.active().collect::<Vec<_>>(), vec!["kept"]);
        log.sweep();
        assert_eq!(log.latest(), Some("kept"));
    }
}
