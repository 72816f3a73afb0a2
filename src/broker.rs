//! In-process loopback broker.
//!
//! DESIGN
//! ======
//! `LoopbackBroker` stands in for the real chat server: clients publish on
//! the command channels, the broker stamps the event and fans it out on the
//! matching broadcast channel to every active subscriber, the sender
//! included. Each client gets a [`LoopbackTransport`] plus the receiving
//! half of an unbounded mpsc channel of [`TransportEvent`]s.
//!
//! State lives behind one `std::sync::Mutex` because the `Transport` methods
//! are synchronous. No lock is held across an await.
//!
//! RELAY RULES
//! ===========
//! - Every relayed event gets `date` set to broker time.
//! - A join picks a palette color, remembers it for the user and rewrites the
//!   text to `"<name> joined the chat"`.
//! - Messages carry the remembered color when there is one.
//! - A leave carries the remembered color, forgets the user and rewrites the
//!   text to `"<name> left the chat"`.
//! - Typing events carry the remembered color or a random palette color.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{Channel, ChatEvent, EventKind, decode_event, encode_event, now_ms};
use crate::transport::{Transport, TransportError, TransportEvent};

/// Colors handed out to joining users.
pub const PALETTE: [&str; 10] = [
    "#FF5733", "#33FF57", "#3357FF", "#FF33F5", "#33FFF5", "#FFD700", "#FF6B35", "#9B59B6", "#1ABC9C", "#E74C3C",
];

// =============================================================================
// BROKER
// =============================================================================

struct LoopbackClient {
    tx: mpsc::UnboundedSender<TransportEvent>,
    active: bool,
    acknowledged: bool,
    subscriptions: HashSet<Channel>,
}

impl LoopbackClient {
    fn deliver(&self, client_id: Uuid, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            debug!(%client_id, "broker: client receiver dropped");
        }
    }
}

struct BrokerInner {
    clients: HashMap<Uuid, LoopbackClient>,
    /// Username -> color assigned on join.
    colors: HashMap<String, String>,
    ack_connects: bool,
}

/// Shared handle to the broker. Clones refer to the same broker.
#[derive(Clone)]
pub struct LoopbackBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl Default for LoopbackBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBroker {
    #[must_use]
    pub fn new() -> Self {
        let inner = BrokerInner { clients: HashMap::new(), colors: HashMap::new(), ack_connects: true };
        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new client connection.
    #[must_use]
    pub fn transport(&self) -> (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client_id = Uuid::new_v4();
        let client = LoopbackClient { tx, active: false, acknowledged: false, subscriptions: HashSet::new() };
        self.lock().clients.insert(client_id, client);
        debug!(%client_id, "broker: client registered");
        (LoopbackTransport { client_id, broker: self.clone() }, rx)
    }

    /// When `false`, activations are accepted but never acknowledged until
    /// [`release_acks`](Self::release_acks) is called.
    pub fn set_ack_connects(&self, ack: bool) {
        self.lock().ack_connects = ack;
    }

    /// Acknowledge every active client still waiting for its ack.
    pub fn release_acks(&self) {
        let mut inner = self.lock();
        for (client_id, client) in &mut inner.clients {
            if client.active && !client.acknowledged {
                client.acknowledged = true;
                client.deliver(*client_id, TransportEvent::Connected);
            }
        }
    }

    /// Report a protocol error to one client and drop its session.
    pub fn fail_client(&self, client_id: Uuid, cause: &str) {
        let mut inner = self.lock();
        let Some(client) = inner.clients.get_mut(&client_id) else {
            return;
        };
        warn!(%client_id, %cause, "broker: failing client");
        client.active = false;
        client.subscriptions.clear();
        client.deliver(client_id, TransportEvent::Error(cause.to_owned()));
    }

    /// Close one client's session from the broker side.
    pub fn drop_client(&self, client_id: Uuid) {
        let mut inner = self.lock();
        let Some(client) = inner.clients.get_mut(&client_id) else {
            return;
        };
        info!(%client_id, "broker: dropping client");
        client.active = false;
        client.subscriptions.clear();
        client.deliver(client_id, TransportEvent::Disconnected);
    }

    /// Deliver a raw body on a broadcast channel without relaying it.
    pub fn inject(&self, channel: Channel, body: &str) {
        let inner = self.lock();
        fan_out(&inner, channel, body);
    }

    /// Color remembered for `username`, if it has joined.
    #[must_use]
    pub fn color_of(&self, username: &str) -> Option<String> {
        self.lock().colors.get(username).cloned()
    }

    /// Number of clients with an active session.
    #[must_use]
    pub fn active_clients(&self) -> usize {
        self.lock().clients.values().filter(|c| c.active).count()
    }
}

fn fan_out(inner: &BrokerInner, channel: Channel, body: &str) {
    for (client_id, client) in &inner.clients {
        if client.active && client.subscriptions.contains(&channel) {
            let event = TransportEvent::Message { channel: channel.as_str().to_owned(), body: body.to_owned() };
            client.deliver(*client_id, event);
        }
    }
}

fn random_color() -> &'static str {
    PALETTE[rand::rng().random_range(0..PALETTE.len())]
}

/// Apply the relay rules to a command-channel event.
fn stamp(colors: &mut HashMap<String, String>, mut event: ChatEvent) -> ChatEvent {
    event.timestamp = now_ms();
    match event.kind {
        EventKind::UserJoined => {
            let color = random_color().to_owned();
            colors.insert(event.sender.clone(), color.clone());
            event.text = format!("{} joined the chat", event.sender);
            event.color = Some(color);
        }
        EventKind::Message => {
            if let Some(color) = colors.get(&event.sender) {
                event.color = Some(color.clone());
            }
        }
        EventKind::UserLeft => {
            if let Some(color) = colors.remove(&event.sender) {
                event.color = Some(color);
            }
            event.text = format!("{} left the chat", event.sender);
        }
        EventKind::TypingStart | EventKind::TypingStop => {
            let color = colors.get(&event.sender).cloned().unwrap_or_else(|| random_color().to_owned());
            event.color = Some(color);
        }
    }
    event
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// One client's connection to a [`LoopbackBroker`].
pub struct LoopbackTransport {
    client_id: Uuid,
    broker: LoopbackBroker,
}

impl LoopbackTransport {
    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }
}

impl Transport for LoopbackTransport {
    fn activate(&mut self) -> Result<(), TransportError> {
        let mut inner = self.broker.lock();
        let ack = inner.ack_connects;
        let Some(client) = inner.clients.get_mut(&self.client_id) else {
            return Err(TransportError::Activation(format!("unknown client {}", self.client_id)));
        };
        client.active = true;
        client.acknowledged = ack;
        client.subscriptions.clear();
        if ack {
            client.deliver(self.client_id, TransportEvent::Connected);
        }
        debug!(client_id = %self.client_id, ack, "broker: client activated");
        Ok(())
    }

    fn deactivate(&mut self) {
        let mut inner = self.broker.lock();
        if let Some(client) = inner.clients.get_mut(&self.client_id) {
            client.active = false;
            client.subscriptions.clear();
        }
    }

    fn subscribe(&mut self, channel: Channel) -> Result<(), TransportError> {
        let mut inner = self.broker.lock();
        match inner.clients.get_mut(&self.client_id) {
            Some(client) if client.active => {
                client.subscriptions.insert(channel);
                Ok(())
            }
            _ => Err(TransportError::Inactive),
        }
    }

    fn publish(&mut self, channel: Channel, body: String) -> Result<(), TransportError> {
        let mut inner = self.broker.lock();
        if !inner.clients.get(&self.client_id).is_some_and(|c| c.active) {
            return Err(TransportError::Inactive);
        }
        let Some(target) = channel.relay_target() else {
            return Err(TransportError::Publish(format!("{channel} is not a command channel")));
        };

        let event = decode_event(channel, &body, now_ms()).map_err(|e| TransportError::Publish(e.to_string()))?;
        let event = stamp(&mut inner.colors, event);
        let relayed = encode_event(&event).map_err(|e| TransportError::Publish(e.to_string()))?;

        debug!(client_id = %self.client_id, %target, kind = %event.kind, "broker: relay");
        fan_out(&inner, target, &relayed);
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.broker.lock().clients.remove(&self.client_id);
    }
}

#[cfg(test)]
#[path = "broker_test.rs"]
mod tests;
