//! Transport seam between the engine and the broker connection.
//!
//! DESIGN
//! ======
//! The engine never sees sockets, framing, heartbeats or reconnect backoff.
//! It owns a `Box<dyn Transport>` for the outbound primitives and receives
//! lifecycle notifications and inbound bodies as [`TransportEvent`]s on a
//! tokio mpsc channel. Swapping the boxed transport is how tests substitute
//! a fake.

use crate::event::Channel;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Operation attempted before `activate()` or after `deactivate()`.
    #[error("transport is not active")]
    Inactive,
    /// Activation could not start a connection attempt.
    #[error("transport activation failed: {0}")]
    Activation(String),
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Notification delivered by the transport to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker acknowledged the session.
    Connected,
    /// The broker or network closed the session.
    Disconnected,
    /// Protocol or socket failure, with a human-readable cause.
    Error(String),
    /// A body arrived on a subscribed channel.
    Message { channel: String, body: String },
}

/// Outbound primitives of a publish/subscribe broker connection.
///
/// Implementations report the outcome of `activate()` asynchronously via
/// [`TransportEvent::Connected`] or [`TransportEvent::Error`].
pub trait Transport: Send {
    /// Start connecting.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Activation`] if no attempt could be started.
    fn activate(&mut self) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn deactivate(&mut self);

    /// Register interest in a broadcast channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not active.
    fn subscribe(&mut self, channel: Channel) -> Result<(), TransportError>;

    /// Send a body on a command channel. No acknowledgment is tracked.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Inactive`] outside an active session and
    /// [`TransportError::Publish`] when the broker refuses the body.
    fn publish(&mut self, channel: Channel, body: String) -> Result<(), TransportError>;
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::sync::{Arc, Mutex, PoisonError};

    use super::*;
    use crate::event::{ChatEvent, EventKind, decode_event};

    /// Everything a [`RecordingTransport`] saw, plus failure switches.
    #[derive(Debug, Default)]
    pub struct TransportLog {
        pub activations: usize,
        pub deactivations: usize,
        pub subscriptions: Vec<Channel>,
        pub published: Vec<(Channel, String)>,
        pub fail_activate: bool,
        pub fail_publish: bool,
        pub active: bool,
    }

    /// Fake transport that records calls. Clones share one log.
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        log: Arc<Mutex<TransportLog>>,
    }

    impl RecordingTransport {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_log<R>(&self, f: impl FnOnce(&mut TransportLog) -> R) -> R {
            let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut log)
        }

        /// Decode every published body back into an event, in publish order.
        #[must_use]
        pub fn published_events(&self) -> Vec<(Channel, ChatEvent)> {
            self.with_log(|log| {
                log.published
                    .iter()
                    .filter_map(|(channel, body)| {
                        let decode_on = channel.relay_target().unwrap_or(*channel);
                        match decode_event(decode_on, body, 0) {
                            Ok(event) => Some((*channel, event)),
                            Err(_) => None,
                        }
                    })
                    .collect()
            })
        }

        #[must_use]
        pub fn published_kinds(&self) -> Vec<EventKind> {
            self.published_events()
                .into_iter()
                .map(|(_, event)| event.kind)
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn activate(&mut self) -> Result<(), TransportError> {
            self.with_log(|log| {
                log.activations += 1;
                if log.fail_activate {
                    return Err(TransportError::Activation("refused".to_owned()));
                }
                log.active = true;
                Ok(())
            })
        }

        fn deactivate(&mut self) {
            self.with_log(|log| {
                log.deactivations += 1;
                log.active = false;
            });
        }

        fn subscribe(&mut self, channel: Channel) -> Result<(), TransportError> {
            self.with_log(|log| {
                log.subscriptions.push(channel);
                Ok(())
            })
        }

        fn publish(&mut self, channel: Channel, body: String) -> Result<(), TransportError> {
            self.with_log(|log| {
                if log.fail_publish {
                    return Err(TransportError::Publish("refused".to_owned()));
                }
                log.published.push((channel, body));
                Ok(())
            })
        }
    }
}
