//! Typing indicators: local debounce protocol and remote presence set.
//!
//! DESIGN
//! ======
//! Two independent halves share this tracker.
//!
//! Local side: keystrokes only record the latest "is the box non-empty"
//! value and push the debounce deadline out. When the deadline passes the
//! value is compared with the last delivered one; only a change produces a
//! [`TypingSignal`]. While typing, every debounced signal re-arms the
//! inactivity deadline, whose expiry forces a stop.
//!
//! Remote side: START upserts an entry stamped with local receive time,
//! STOP removes it, and every mutation is followed by a sweep that drops
//! entries older than `typing_timeout + typing_grace`. The earliest expiry
//! is also exposed as a deadline so idle entries vanish without traffic.
//!
//! Timers are `Option<Instant>` deadlines. Re-arming overwrites the old
//! deadline, so a timer can never fire twice for one arming.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::SessionConfig;
use crate::event::{Channel, ChatEvent, EventKind, decode_event};

/// A local typing transition to announce on `typing-command`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

impl TypingSignal {
    #[must_use]
    pub fn kind(self) -> EventKind {
        match self {
            Self::Start => EventKind::TypingStart,
            Self::Stop => EventKind::TypingStop,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocalTypingState {
    pub is_typing: bool,
    pub last_keystroke_at: Option<Instant>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypingPresenceEntry {
    pub username: String,
    pub color: Option<String>,
    pub last_seen: Instant,
}

#[derive(Clone, Copy, Debug)]
struct PendingInput {
    deadline: Instant,
    non_empty: bool,
}

pub struct TypingPresenceTracker {
    local: LocalTypingState,
    pending: Option<PendingInput>,
    inactivity_deadline: Option<Instant>,
    /// Insertion-ordered; usernames are unique.
    entries: Vec<TypingPresenceEntry>,
    debounce: Duration,
    inactivity: Duration,
    presence_ttl: Duration,
}

impl TypingPresenceTracker {
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            local: LocalTypingState::default(),
            pending: None,
            inactivity_deadline: None,
            entries: Vec::new(),
            debounce: config.typing_debounce,
            inactivity: config.typing_timeout,
            presence_ttl: config.presence_ttl(),
        }
    }

    // =========================================================================
    // LOCAL
    // =========================================================================

    #[must_use]
    pub fn local_state(&self) -> LocalTypingState {
        self.local
    }

    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.local.is_typing
    }

    /// Record a keystroke; `input_len` is the current length of the text box.
    pub fn on_input_at(&mut self, input_len: usize, now: Instant) {
        self.local.last_keystroke_at = Some(now);
        self.pending = Some(PendingInput { deadline: now + self.debounce, non_empty: input_len > 0 });
    }

    /// Run every local timer that is due at `now`, oldest deadline first.
    pub fn fire_timers_at(&mut self, now: Instant) -> Vec<TypingSignal> {
        let mut signals = Vec::new();
        loop {
            let debounce_due = self.pending.filter(|p| p.deadline <= now).map(|p| p.deadline);
            let inactivity_due = self.inactivity_deadline.filter(|d| *d <= now);

            match (debounce_due, inactivity_due) {
                (Some(d), Some(i)) if i < d => self.fire_inactivity(&mut signals),
                (Some(_), _) => self.fire_debounce(&mut signals),
                (None, Some(_)) => self.fire_inactivity(&mut signals),
                (None, None) => break,
            }
        }
        signals
    }

    fn fire_debounce(&mut self, signals: &mut Vec<TypingSignal>) {
        let Some(input) = self.pending.take() else {
            return;
        };
        if input.non_empty != self.local.is_typing {
            self.local.is_typing = input.non_empty;
            signals.push(if input.non_empty { TypingSignal::Start } else { TypingSignal::Stop });
        }
        self.inactivity_deadline = self.local.is_typing.then(|| input.deadline + self.inactivity);
    }

    fn fire_inactivity(&mut self, signals: &mut Vec<TypingSignal>) {
        self.inactivity_deadline = None;
        if self.local.is_typing {
            debug!("typing: inactivity timeout");
            self.local.is_typing = false;
            signals.push(TypingSignal::Stop);
        }
    }

    /// Stop typing immediately (message sent). Disarms both local timers.
    pub fn force_stop(&mut self) -> Option<TypingSignal> {
        self.pending = None;
        self.inactivity_deadline = None;
        if !self.local.is_typing {
            return None;
        }
        self.local.is_typing = false;
        Some(TypingSignal::Stop)
    }

    /// Forget local typing state without announcing anything.
    pub fn cancel_local(&mut self) {
        self.pending = None;
        self.inactivity_deadline = None;
        self.local.is_typing = false;
    }

    // =========================================================================
    // REMOTE
    // =========================================================================

    #[must_use]
    pub fn entries(&self) -> &[TypingPresenceEntry] {
        &self.entries
    }

    /// Decode a `typing-broadcast` body and apply it.
    ///
    /// Returns whether the presence set changed. Malformed bodies are logged
    /// and dropped.
    pub fn on_inbound_at(&mut self, body: &str, local_username: &str, received_at_ms: i64, now: Instant) -> bool {
        match decode_event(Channel::TypingBroadcast, body, received_at_ms) {
            Ok(event) => self.on_remote_at(&event, local_username, now),
            Err(e) => {
                error!(error = %e, "typing: dropping malformed event");
                false
            }
        }
    }

    /// Apply a validated remote typing event, then sweep.
    pub fn on_remote_at(&mut self, event: &ChatEvent, local_username: &str, now: Instant) -> bool {
        if event.sender == local_username {
            return false;
        }

        let position = self.entries.iter().position(|e| e.username == event.sender);
        let mut changed = match (event.kind, position) {
            (EventKind::TypingStart, Some(i)) => {
                self.entries[i] = entry(event, now);
                true
            }
            (EventKind::TypingStart, None) => {
                self.entries.push(entry(event, now));
                true
            }
            (EventKind::TypingStop, Some(i)) => {
                self.entries.remove(i);
                true
            }
            _ => false,
        };

        changed |= self.sweep_at(now);
        changed
    }

    /// Drop entries whose age has reached the presence TTL.
    pub fn sweep_at(&mut self, now: Instant) -> bool {
        let before = self.entries.len();
        let ttl = self.presence_ttl;
        self.entries.retain(|e| now.saturating_duration_since(e.last_seen) < ttl);
        self.entries.len() != before
    }

    /// Clear the remote presence set.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// One-line description of who is typing.
    #[must_use]
    pub fn summary_text(&self) -> String {
        match self.entries.as_slice() {
            [] => String::new(),
            [a] => format!("{} is typing…", a.username),
            [a, b] => format!("{} and {} are typing…", a.username, b.username),
            [a, rest @ ..] => format!("{} and {} others are typing…", a.username, rest.len()),
        }
    }

    /// Earliest pending deadline across debounce, inactivity and presence expiry.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let expiry = self
            .entries
            .iter()
            .map(|e| e.last_seen + self.presence_ttl)
            .min();
        [self.pending.map(|p| p.deadline), self.inactivity_deadline, expiry]
            .into_iter()
            .flatten()
            .min()
    }
}

fn entry(event: &ChatEvent, now: Instant) -> TypingPresenceEntry {
    TypingPresenceEntry { username: event.sender.clone(), color: event.color.clone(), last_seen: now }
}

#[cfg(test)]
#[path = "typing_test.rs"]
mod tests;
