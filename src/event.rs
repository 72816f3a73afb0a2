//! Chat wire events and channel routing.
//!
//! DESIGN
//! ======
//! Every event on the broker is a flat JSON object:
//! `{ sender, text, date, color?, type }`. Parsing happens once, at the
//! boundary: [`decode_event`] validates a body against the channel it arrived
//! on and yields a typed [`ChatEvent`], so handlers never touch raw JSON.
//!
//! The private `WireEvent` mirrors the JSON exactly (optional fields stay
//! optional); conversion into `ChatEvent` is where defaults and validation
//! are applied.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =============================================================================
// ERROR
// =============================================================================

/// Error returned by [`decode_event`] and [`encode_event`].
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The body is not a JSON object with the expected fields.
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),
    /// The `sender` field is present but blank.
    #[error("event sender is empty")]
    EmptySender,
    /// The event kind does not belong on the channel it arrived on.
    #[error("{kind} event is not allowed on channel {channel}")]
    WrongChannel { kind: EventKind, channel: Channel },
    /// The transport reported a channel name this client does not know.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

// =============================================================================
// CHANNELS
// =============================================================================

/// Named publish/subscribe topics on the broker.
///
/// Inbound (`*Broadcast`) and outbound (`*Command`) channels are distinct even
/// for the same event category: clients publish commands and the broker fans
/// the stamped result out on the matching broadcast channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    MessageBroadcast,
    MessageCommand,
    TypingBroadcast,
    TypingCommand,
}

impl Channel {
    /// Channels a client subscribes to after the broker acknowledges it.
    pub const SUBSCRIPTIONS: [Channel; 2] = [Channel::MessageBroadcast, Channel::TypingBroadcast];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageBroadcast => "message-broadcast",
            Self::MessageCommand => "message-command",
            Self::TypingBroadcast => "typing-broadcast",
            Self::TypingCommand => "typing-command",
        }
    }

    /// Parse a channel name as reported by the transport.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownChannel`] for names outside the routing table.
    pub fn parse(name: &str) -> Result<Self, EventError> {
        match name {
            "message-broadcast" => Ok(Self::MessageBroadcast),
            "message-command" => Ok(Self::MessageCommand),
            "typing-broadcast" => Ok(Self::TypingBroadcast),
            "typing-command" => Ok(Self::TypingCommand),
            other => Err(EventError::UnknownChannel(other.to_owned())),
        }
    }

    /// Outbound channel a locally produced event of `kind` is published on.
    #[must_use]
    pub fn command_for(kind: EventKind) -> Self {
        if kind.is_typing() { Self::TypingCommand } else { Self::MessageCommand }
    }

    /// Broadcast channel the broker relays this command channel to.
    #[must_use]
    pub fn relay_target(self) -> Option<Self> {
        match self {
            Self::MessageCommand => Some(Self::MessageBroadcast),
            Self::TypingCommand => Some(Self::TypingBroadcast),
            Self::MessageBroadcast | Self::TypingBroadcast => None,
        }
    }

    #[must_use]
    pub fn is_broadcast(self) -> bool {
        matches!(self, Self::MessageBroadcast | Self::TypingBroadcast)
    }

    /// Whether events of `kind` may travel on this channel.
    #[must_use]
    pub fn carries(self, kind: EventKind) -> bool {
        match self {
            Self::MessageBroadcast | Self::MessageCommand => !kind.is_typing(),
            Self::TypingBroadcast | Self::TypingCommand => kind.is_typing(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// EVENT KIND
// =============================================================================

/// Discriminant of a chat event.
///
/// The broker spells the join kind `NEW_USER`; `USER_JOINED` is accepted on
/// input as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Message,
    #[serde(rename = "NEW_USER", alias = "USER_JOINED")]
    UserJoined,
    UserLeft,
    TypingStart,
    TypingStop,
}

impl EventKind {
    /// Join/leave notifications render as system messages.
    #[must_use]
    pub fn is_system(self) -> bool {
        matches!(self, Self::UserJoined | Self::UserLeft)
    }

    #[must_use]
    pub fn is_typing(self) -> bool {
        matches!(self, Self::TypingStart | Self::TypingStop)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "MESSAGE",
            Self::UserJoined => "NEW_USER",
            Self::UserLeft => "USER_LEFT",
            Self::TypingStart => "TYPING_START",
            Self::TypingStop => "TYPING_STOP",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CHAT EVENT
// =============================================================================

/// A validated event from the broker. Immutable once received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEvent {
    pub sender: String,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub color: Option<String>,
    pub kind: EventKind,
}

impl ChatEvent {
    /// Build an outbound event stamped with the current wall-clock time.
    #[must_use]
    pub fn outbound(kind: EventKind, sender: &str, text: impl Into<String>, color: Option<&str>) -> Self {
        Self {
            sender: sender.to_owned(),
            text: text.into(),
            timestamp: now_ms(),
            color: color.map(ToOwned::to_owned),
            kind,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    sender: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(rename = "type")]
    kind: EventKind,
}

/// Decode and validate an inbound body.
///
/// A missing `text` becomes the empty string and a missing `date` is stamped
/// with `received_at_ms`.
///
/// # Errors
///
/// Returns [`EventError::Json`] for unparseable bodies or unknown kinds,
/// [`EventError::EmptySender`] for blank senders and
/// [`EventError::WrongChannel`] when the kind does not match `channel`.
pub fn decode_event(channel: Channel, body: &str, received_at_ms: i64) -> Result<ChatEvent, EventError> {
    let wire: WireEvent = serde_json::from_str(body)?;

    if wire.sender.trim().is_empty() {
        return Err(EventError::EmptySender);
    }
    if !channel.carries(wire.kind) {
        return Err(EventError::WrongChannel { kind: wire.kind, channel });
    }

    Ok(ChatEvent {
        sender: wire.sender,
        text: wire.text.unwrap_or_default(),
        timestamp: wire.date.unwrap_or(received_at_ms),
        color: wire.color.filter(|c| !c.is_empty()),
        kind: wire.kind,
    })
}

/// Encode an event as its JSON wire body.
///
/// # Errors
///
/// Returns [`EventError::Json`] if serialization fails.
pub fn encode_event(event: &ChatEvent) -> Result<String, EventError> {
    let wire = WireEvent {
        sender: event.sender.clone(),
        text: Some(event.text.clone()),
        date: Some(event.timestamp),
        color: event.color.clone(),
        kind: event.kind,
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
