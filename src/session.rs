//! Chat session: composes the connection, the message log and the typing
//! tracker, and drives them from one task.
//!
//! DESIGN
//! ======
//! `ChatSession` is a plain synchronous state holder. Every operation that
//! depends on time has an `_at(now)` form, so tests can walk the clock
//! explicitly. `spawn_session` runs it on a tokio task: a `select!` loop over
//! presentation commands, transport events and the nearest timer deadline.
//! Nothing runs concurrently with a handler, so no locking is needed.
//!
//! Presentation is told about every observable change through
//! [`SessionUpdate`]s on an unbounded mpsc channel.
//!
//! LIFECYCLE
//! =========
//! 1. `set_username` → `connect` → transport ack → `Connected`
//! 2. Inbound events → log / presence; keystrokes → typing signals
//! 3. `disconnect` or transport close → presence cleared, local timers disarmed
//! 4. Command channel closed or `Shutdown` → `shutdown_at` disarms everything

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::connection::{ConnectError, ConnectionManager, ConnectionState, Inbound};
use crate::event::{Channel, ChatEvent, EventKind, now_ms};
use crate::messages::{DisplayMessage, MessageStream};
use crate::transport::{Transport, TransportEvent};
use crate::typing::{TypingPresenceEntry, TypingPresenceTracker, TypingSignal};

// =============================================================================
// UPDATES / COMMANDS
// =============================================================================

/// Change notification for the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionUpdate {
    Connection { state: ConnectionState, cause: Option<String> },
    /// New content was appended; presentation should scroll to the bottom.
    MessageAppended(DisplayMessage),
    LogTruncated { dropped: usize },
    LogCleared,
    LocalColor(String),
    /// New who-is-typing summary (empty when nobody is typing).
    Typing(String),
    /// User-visible warning.
    Warning(String),
}

/// Presentation → session requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    SetUsername(String),
    EditUsername,
    Connect,
    Disconnect,
    SendMessage(String),
    /// Current length of the message input box after a keystroke.
    Input(usize),
    ClearMessages,
    Shutdown,
}

// =============================================================================
// SESSION
// =============================================================================

pub struct ChatSession {
    connection: ConnectionManager,
    messages: MessageStream,
    typing: TypingPresenceTracker,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    typing_summary: String,
}

impl ChatSession {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        Self {
            connection: ConnectionManager::new(transport, config.connect_timeout, now_ms()),
            messages: MessageStream::new(&config),
            typing: TypingPresenceTracker::new(&config),
            updates,
            typing_summary: String::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&ConnectError> {
        self.connection.last_error()
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.connection.username()
    }

    #[must_use]
    pub fn local_color(&self) -> &str {
        self.messages.local_color()
    }

    #[must_use]
    pub fn messages(&self) -> &[DisplayMessage] {
        self.messages.messages()
    }

    #[must_use]
    pub fn is_mine(&self, message: &DisplayMessage) -> bool {
        self.messages.is_mine(message)
    }

    #[must_use]
    pub fn presence(&self) -> &[TypingPresenceEntry] {
        self.typing.entries()
    }

    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.typing.is_typing()
    }

    #[must_use]
    pub fn typing_summary(&self) -> &str {
        &self.typing_summary
    }

    /// Earliest armed timer across all components.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.connection.next_deadline(), self.typing.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Apply one presentation command.
    ///
    /// Rejections have already been reported as [`SessionUpdate::Warning`].
    pub fn apply_at(&mut self, command: Command, now: Instant) {
        let result = match command {
            Command::SetUsername(name) => self.set_username(&name),
            Command::EditUsername => self.edit_username(),
            Command::Connect => self.connect_at(now),
            Command::Disconnect => {
                self.disconnect();
                Ok(())
            }
            Command::SendMessage(text) => {
                if !self.send_message(&text) {
                    debug!("session: message not sent");
                }
                Ok(())
            }
            Command::Input(len) => {
                self.on_input_at(len, now);
                Ok(())
            }
            Command::ClearMessages => {
                self.clear_messages();
                Ok(())
            }
            Command::Shutdown => {
                self.shutdown();
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "session: command rejected");
        }
    }

    /// Confirm the local username.
    ///
    /// # Errors
    ///
    /// Returns the validation or lock error; it is also sent as a warning.
    pub fn set_username(&mut self, raw: &str) -> Result<(), ConnectError> {
        self.connection.set_username(raw).inspect_err(|e| self.warn(e))
    }

    /// Reopen the username for editing.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::UsernameLocked`] while connected.
    pub fn edit_username(&mut self) -> Result<(), ConnectError> {
        self.connection.edit_username().inspect_err(|e| self.warn(e))
    }

    /// Start connecting.
    ///
    /// # Errors
    ///
    /// Returns why the attempt was rejected or failed immediately; the same
    /// text is sent as a warning.
    pub fn connect_at(&mut self, now: Instant) -> Result<(), ConnectError> {
        let before = self.connection.state();
        let result = self.connection.connect_at(now);
        if self.connection.state() == ConnectionState::Connecting && before != ConnectionState::Connecting {
            self.messages.begin_connection(self.connection.username());
        }
        self.notify_state_change(before);
        result.inspect_err(|e| self.warn(e))
    }

    /// Leave the chat: announce stop/leave, close, clear remote presence.
    pub fn disconnect(&mut self) {
        let before = self.connection.state();
        let stop_typing = self.typing.is_typing();
        let color = self.messages.local_color().to_owned();
        if self.connection.disconnect(stop_typing, Some(&color)) {
            self.end_session(before);
        }
    }

    /// Publish a chat message. Blank text is ignored.
    ///
    /// Returns whether the message was handed to the transport.
    pub fn send_message(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if !self.connection.is_connected() {
            self.emit(SessionUpdate::Warning("not connected".to_owned()));
            return false;
        }

        let event = ChatEvent::outbound(
            EventKind::Message,
            self.connection.username(),
            text,
            Some(self.messages.local_color()),
        );
        self.connection.publish(&event);

        if let Some(signal) = self.typing.force_stop() {
            self.publish_typing(signal);
        }
        true
    }

    /// Keystroke in the message box. Ignored outside a live session.
    pub fn on_input_at(&mut self, input_len: usize, now: Instant) {
        if !self.connection.is_connected() {
            debug!(input_len, "session: input ignored while not connected");
            return;
        }
        self.typing.on_input_at(input_len, now);
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.emit(SessionUpdate::LogCleared);
    }

    /// Teardown: leave any live session and disarm every timer.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.typing.cancel_local();
        self.typing.reset();
        self.refresh_typing_summary();
        info!(username = %self.connection.username(), "session: shut down");
    }

    // =========================================================================
    // TRANSPORT / TIMERS
    // =========================================================================

    /// Handle one transport notification in arrival order.
    pub fn handle_transport_event_at(&mut self, event: TransportEvent, now: Instant) {
        let before = self.connection.state();
        match self.connection.on_transport_event(event) {
            None => {}
            Some(Inbound::State(ConnectionState::Connected)) => self.notify_state_change(before),
            Some(Inbound::State(_)) => self.end_session(before),
            Some(Inbound::Message { channel: Channel::MessageBroadcast, body }) => {
                if let Some(appended) = self.messages.on_inbound(&body, now_ms()) {
                    if let Some(color) = appended.local_color {
                        self.emit(SessionUpdate::LocalColor(color));
                    }
                    self.emit(SessionUpdate::MessageAppended(appended.message));
                    if appended.dropped > 0 {
                        self.emit(SessionUpdate::LogTruncated { dropped: appended.dropped });
                    }
                }
            }
            Some(Inbound::Message { channel: Channel::TypingBroadcast, body }) => {
                let local = self.connection.username().to_owned();
                if self.typing.on_inbound_at(&body, &local, now_ms(), now) {
                    self.refresh_typing_summary();
                }
            }
            Some(Inbound::Message { channel, .. }) => {
                warn!(%channel, "session: unexpected channel");
            }
        }
    }

    /// Run every timer that is due at `now`.
    pub fn fire_timers_at(&mut self, now: Instant) {
        let before = self.connection.state();
        if self.connection.poll_timeout_at(now) {
            self.end_session(before);
        }

        for signal in self.typing.fire_timers_at(now) {
            self.publish_typing(signal);
        }

        if self.typing.sweep_at(now) {
            self.refresh_typing_summary();
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Common exit from `Connecting`/`Connected`: drop local typing state
    /// and remote presence, then report the new state.
    fn end_session(&mut self, before: ConnectionState) {
        self.typing.cancel_local();
        self.typing.reset();
        self.refresh_typing_summary();
        self.notify_state_change(before);
        if self.connection.state() == ConnectionState::Error {
            if let Some(err) = self.connection.last_error() {
                let text = err.to_string();
                self.emit(SessionUpdate::Warning(text));
            }
        }
    }

    fn publish_typing(&mut self, signal: TypingSignal) {
        let kind = signal.kind();
        let event = ChatEvent::outbound(
            kind,
            self.connection.username(),
            kind.as_str(),
            Some(self.messages.local_color()),
        );
        self.connection.publish(&event);
    }

    fn notify_state_change(&mut self, before: ConnectionState) {
        let state = self.connection.state();
        if state == before {
            return;
        }
        let cause = self.connection.last_error().map(ToString::to_string);
        self.emit(SessionUpdate::Connection { state, cause });
    }

    fn refresh_typing_summary(&mut self) {
        let summary = self.typing.summary_text();
        if summary != self.typing_summary {
            self.typing_summary.clone_from(&summary);
            self.emit(SessionUpdate::Typing(summary));
        }
    }

    fn warn(&self, err: &ConnectError) {
        warn!(error = %err, "session: rejected");
        self.emit(SessionUpdate::Warning(err.to_string()));
    }

    fn emit(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            debug!("session: update receiver dropped");
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Presentation-side handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Queue a command. Returns `false` once the session task has ended.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn set_username(&self, name: &str) -> bool {
        self.send(Command::SetUsername(name.to_owned()))
    }

    pub fn connect(&self) -> bool {
        self.send(Command::Connect)
    }

    pub fn disconnect(&self) -> bool {
        self.send(Command::Disconnect)
    }

    pub fn send_message(&self, text: &str) -> bool {
        self.send(Command::SendMessage(text.to_owned()))
    }

    pub fn input(&self, len: usize) -> bool {
        self.send(Command::Input(len))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

/// Spawn the session loop. The task ends after `Command::Shutdown` or when
/// every handle is dropped, and yields the final session state.
pub fn spawn_session(
    session: ChatSession,
    events: mpsc::UnboundedReceiver<TransportEvent>,
) -> (SessionHandle, JoinHandle<ChatSession>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_session(session, events, rx));
    (SessionHandle { commands: tx }, task)
}

async fn run_session(
    mut session: ChatSession,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> ChatSession {
    let mut transport_open = true;

    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => session.apply_at(command, Instant::now()),
            },
            event = events.recv(), if transport_open => match event {
                Some(event) => session.handle_transport_event_at(event, Instant::now()),
                None => {
                    warn!("session: transport event stream closed");
                    transport_open = false;
                    session.handle_transport_event_at(TransportEvent::Disconnected, Instant::now());
                }
            },
            () = sleep_until(deadline) => session.fire_timers_at(Instant::now()),
        }
    }

    session.shutdown();
    session
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
