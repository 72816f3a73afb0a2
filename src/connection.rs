//! Connection lifecycle state machine.
//!
//! DESIGN
//! ======
//! `ConnectionManager` owns the transport handle, the local identity and the
//! connect timer. It never blocks: time is passed in explicitly (`*_at`
//! methods take a `tokio::time::Instant`) and the timer is an
//! `Option<Instant>` deadline that the session driver sleeps on.
//!
//! LIFECYCLE
//! =========
//! ```text
//! Disconnected|Error --connect--> Connecting --ack--> Connected
//!          ^                        |   |                 |
//!          |          timeout/error |   | disconnect      | error
//!          |                        v   v                 v
//!          +---------------------- Error / Disconnected <-+
//! ```
//! Leaving `Connecting` always disarms the connect timer. Entering `Error`
//! deactivates the transport; retrying is an explicit `connect()`.
//!
//! ERROR HANDLING
//! ==============
//! Publishing is best-effort: failures are logged and swallowed so that a
//! closing socket can never wedge a state transition.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::event::{Channel, ChatEvent, EventKind, encode_event};
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::username::{UsernameError, default_username, validate_username};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("set your username first")]
    UsernameNotSet,
    #[error(transparent)]
    InvalidUsername(#[from] UsernameError),
    #[error("disconnect before changing your username")]
    UsernameLocked,
    #[error("connection timed out after {0} ms")]
    Timeout(u128),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Activation(#[from] TransportError),
}

/// What the session should do with a routed transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The connection state changed as a result of the event.
    State(ConnectionState),
    /// A body arrived on a subscribed broadcast channel.
    Message { channel: Channel, body: String },
}

// =============================================================================
// CONNECTION MANAGER
// =============================================================================

pub struct ConnectionManager {
    transport: Box<dyn Transport>,
    state: ConnectionState,
    last_error: Option<ConnectError>,
    username: String,
    username_confirmed: bool,
    connect_deadline: Option<Instant>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    /// Create a manager in `Disconnected` with a generated, unconfirmed username.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, connect_timeout: Duration, now_ms: i64) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            last_error: None,
            username: default_username(now_ms),
            username_confirmed: false,
            connect_deadline: None,
            connect_timeout,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Cause of the most recent transition into `Error`.
    #[must_use]
    pub fn last_error(&self) -> Option<&ConnectError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn is_username_confirmed(&self) -> bool {
        self.username_confirmed
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connect_deadline
    }

    /// Validate and confirm the local username.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::UsernameLocked`] while a session is live and
    /// [`ConnectError::InvalidUsername`] when validation fails.
    pub fn set_username(&mut self, raw: &str) -> Result<(), ConnectError> {
        self.ensure_username_unlocked()?;
        self.username = validate_username(raw)?;
        self.username_confirmed = true;
        info!(username = %self.username, "connection: username set");
        Ok(())
    }

    /// Put the username back into editing mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::UsernameLocked`] while a session is live.
    pub fn edit_username(&mut self) -> Result<(), ConnectError> {
        self.ensure_username_unlocked()?;
        self.username_confirmed = false;
        Ok(())
    }

    fn ensure_username_unlocked(&self) -> Result<(), ConnectError> {
        if matches!(self.state, ConnectionState::Connected | ConnectionState::Connecting) {
            return Err(ConnectError::UsernameLocked);
        }
        Ok(())
    }

    /// Start a connection attempt.
    ///
    /// A no-op while already `Connecting` or `Connected`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::UsernameNotSet`] before a username is
    /// confirmed, and [`ConnectError::Activation`] if the transport refuses
    /// to start (the state is then `Error`).
    pub fn connect_at(&mut self, now: Instant) -> Result<(), ConnectError> {
        if !self.username_confirmed || self.username.trim().is_empty() {
            return Err(ConnectError::UsernameNotSet);
        }

        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(state = ?self.state, "connection: connect ignored");
                return Ok(());
            }
            ConnectionState::Disconnected | ConnectionState::Error => {}
        }

        info!(username = %self.username, "connection: connecting");
        self.state = ConnectionState::Connecting;
        self.last_error = None;
        self.connect_deadline = Some(now + self.connect_timeout);

        if let Err(e) = self.transport.activate() {
            let err = ConnectError::Activation(e);
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Route one transport notification.
    ///
    /// Returns `None` when the event is ignored in the current state.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Option<Inbound> {
        match event {
            TransportEvent::Connected => self.on_acknowledged(),
            TransportEvent::Disconnected => self.on_remote_disconnect(),
            TransportEvent::Error(cause) => {
                if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
                    debug!(%cause, state = ?self.state, "connection: transport error ignored");
                    return None;
                }
                self.fail(ConnectError::Transport(cause));
                Some(Inbound::State(ConnectionState::Error))
            }
            TransportEvent::Message { channel, body } => self.route_message(&channel, body),
        }
    }

    fn on_acknowledged(&mut self) -> Option<Inbound> {
        if self.state != ConnectionState::Connecting {
            warn!(state = ?self.state, "connection: unexpected acknowledgment ignored");
            return None;
        }

        self.state = ConnectionState::Connected;
        self.connect_deadline = None;
        info!(username = %self.username, "connection: connected");

        for channel in Channel::SUBSCRIPTIONS {
            if let Err(e) = self.transport.subscribe(channel) {
                warn!(%channel, error = %e, "connection: subscribe failed");
            }
        }

        let joined = ChatEvent::outbound(EventKind::UserJoined, &self.username, "", None);
        self.publish(&joined);

        Some(Inbound::State(ConnectionState::Connected))
    }

    fn on_remote_disconnect(&mut self) -> Option<Inbound> {
        match self.state {
            ConnectionState::Connected => {
                info!(username = %self.username, "connection: closed by transport");
                self.state = ConnectionState::Disconnected;
                Some(Inbound::State(ConnectionState::Disconnected))
            }
            // The transport may drop and retry while connecting; the connect
            // timer still bounds the attempt.
            ConnectionState::Connecting | ConnectionState::Disconnected | ConnectionState::Error => {
                debug!(state = ?self.state, "connection: transport disconnect ignored");
                None
            }
        }
    }

    fn route_message(&self, channel: &str, body: String) -> Option<Inbound> {
        if self.state != ConnectionState::Connected {
            debug!(%channel, state = ?self.state, "connection: message outside session dropped");
            return None;
        }
        match Channel::parse(channel) {
            Ok(channel) if channel.is_broadcast() => Some(Inbound::Message { channel, body }),
            Ok(channel) => {
                warn!(%channel, "connection: message on command channel dropped");
                None
            }
            Err(e) => {
                warn!(error = %e, "connection: message dropped");
                None
            }
        }
    }

    /// Fire the connect timer if it is due.
    ///
    /// Returns `true` exactly once per timed-out attempt.
    pub fn poll_timeout_at(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.connect_deadline else {
            return false;
        };
        if now < deadline {
            return false;
        }
        self.connect_deadline = None;
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.fail(ConnectError::Timeout(self.connect_timeout.as_millis()));
        true
    }

    /// Publish an event on the command channel for its kind.
    ///
    /// Fire-and-forget: failures are logged, never returned.
    pub fn publish(&mut self, event: &ChatEvent) {
        if self.state != ConnectionState::Connected {
            debug!(kind = %event.kind, state = ?self.state, "connection: publish while not connected dropped");
            return;
        }
        let channel = Channel::command_for(event.kind);
        let body = match encode_event(event) {
            Ok(body) => body,
            Err(e) => {
                warn!(kind = %event.kind, error = %e, "connection: encode failed");
                return;
            }
        };
        if let Err(e) = self.transport.publish(channel, body) {
            warn!(%channel, kind = %event.kind, error = %e, "connection: publish failed");
        }
    }

    /// Tear down the session.
    ///
    /// From `Connected`: optionally announce TYPING_STOP, announce USER_LEFT
    /// (both best-effort), deactivate, then move to `Disconnected`. From
    /// `Connecting`: abandon the attempt silently. Returns whether a
    /// transition happened.
    pub fn disconnect(&mut self, stop_typing: bool, color: Option<&str>) -> bool {
        match self.state {
            ConnectionState::Connected => {
                info!(username = %self.username, "connection: disconnecting");
                if stop_typing {
                    let stop = ChatEvent::outbound(EventKind::TypingStop, &self.username, "TYPING_STOP", color);
                    self.publish(&stop);
                }
                let left = ChatEvent::outbound(EventKind::UserLeft, &self.username, "", color);
                self.publish(&left);
            }
            ConnectionState::Connecting => {
                info!(username = %self.username, "connection: connect attempt cancelled");
                self.connect_deadline = None;
            }
            ConnectionState::Disconnected | ConnectionState::Error => return false,
        }

        self.transport.deactivate();
        self.state = ConnectionState::Disconnected;
        true
    }

    fn fail(&mut self, err: ConnectError) {
        warn!(error = %err, "connection: failed");
        self.connect_deadline = None;
        self.transport.deactivate();
        self.state = ConnectionState::Error;
        self.last_error = Some(err);
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
