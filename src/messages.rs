//! Bounded chat history.
//!
//! DESIGN
//! ======
//! `MessageStream` turns validated chat-channel events into immutable
//! `DisplayMessage`s and keeps them in arrival order. The log is append-only;
//! when it grows past `log_max` it is cut back to the newest `log_keep`
//! entries so truncation happens once per burst rather than on every append.
//!
//! ERROR HANDLING
//! ==============
//! Bodies are decoded here, at the boundary. A body that fails to decode is
//! logged and dropped before anything is mutated.

use time::OffsetDateTime;
use tracing::{error, info};

use crate::config::SessionConfig;
use crate::event::{Channel, ChatEvent, EventKind, decode_event};

/// Display color of the local user until the broker assigns one.
pub const DEFAULT_LOCAL_COLOR: &str = "#000000";

/// A rendered chat line. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMessage {
    pub username: String,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub date: i64,
    /// Color as delivered with the event; `None` when the broker sent none.
    pub color: Option<String>,
    pub kind: EventKind,
    pub is_system: bool,
}

impl DisplayMessage {
    #[must_use]
    pub fn from_event(event: &ChatEvent) -> Self {
        Self {
            username: event.sender.clone(),
            text: event.text.clone(),
            date: event.timestamp,
            color: event.color.clone(),
            kind: event.kind,
            is_system: event.kind.is_system(),
        }
    }

    /// `HH:MM` of the message date in UTC, or `--:--` if out of range.
    ///
    /// Hosts that show local wall-clock time convert `date` themselves.
    #[must_use]
    pub fn clock_label(&self) -> String {
        let nanos = i128::from(self.date) * 1_000_000;
        match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
            Ok(at) => format!("{:02}:{:02}", at.hour(), at.minute()),
            Err(_) => "--:--".to_owned(),
        }
    }
}

/// Result of a successful append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Appended {
    pub message: DisplayMessage,
    /// Number of old messages dropped by the capacity policy.
    pub dropped: usize,
    /// Set when this event assigned the local display color.
    pub local_color: Option<String>,
}

pub struct MessageStream {
    log: Vec<DisplayMessage>,
    log_max: usize,
    log_keep: usize,
    local_username: String,
    local_color: String,
    color_assigned: bool,
}

impl MessageStream {
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            log: Vec::new(),
            log_max: config.log_max,
            log_keep: config.log_keep,
            local_username: String::new(),
            local_color: DEFAULT_LOCAL_COLOR.to_owned(),
            color_assigned: false,
        }
    }

    /// Prepare for a new connection: the next self-join may assign a color.
    pub fn begin_connection(&mut self, username: &str) {
        username.clone_into(&mut self.local_username);
        self.color_assigned = false;
    }

    #[must_use]
    pub fn messages(&self) -> &[DisplayMessage] {
        &self.log
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    #[must_use]
    pub fn local_color(&self) -> &str {
        &self.local_color
    }

    #[must_use]
    pub fn is_mine(&self, message: &DisplayMessage) -> bool {
        message.username == self.local_username
    }

    /// Decode a `message-broadcast` body and append it.
    ///
    /// Malformed bodies are logged and dropped; `None` means nothing changed.
    pub fn on_inbound(&mut self, body: &str, received_at_ms: i64) -> Option<Appended> {
        match decode_event(Channel::MessageBroadcast, body, received_at_ms) {
            Ok(event) => Some(self.append(&event)),
            Err(e) => {
                error!(error = %e, "messages: dropping malformed event");
                None
            }
        }
    }

    /// Append an already validated event.
    pub fn append(&mut self, event: &ChatEvent) -> Appended {
        let mut local_color = None;
        if event.kind == EventKind::UserJoined && !self.color_assigned && event.sender == self.local_username {
            if let Some(color) = &event.color {
                color.clone_into(&mut self.local_color);
                self.color_assigned = true;
                info!(color = %color, "messages: local color assigned");
                local_color = Some(color.clone());
            }
        }

        let message = DisplayMessage::from_event(event);
        self.log.push(message.clone());

        let mut dropped = 0;
        if self.log.len() > self.log_max {
            dropped = self.log.len() - self.log_keep;
            self.log.drain(..dropped);
        }

        Appended { message, dropped, local_color }
    }

    /// Empty the log. Local only, nothing is broadcast.
    pub fn clear(&mut self) {
        self.log.clear();
    }
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
