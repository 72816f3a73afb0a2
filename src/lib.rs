//! Client-side synchronization engine for a real-time chat room.
//!
//! The engine keeps a local session consistent with a publish/subscribe chat
//! broker: it manages the connection lifecycle, decodes and validates inbound
//! events into a bounded message log, debounces local typing activity into
//! start/stop signals and tracks which remote users are typing. Rendering is
//! left to the host, which drives a [`session::ChatSession`] with commands and
//! receives [`session::SessionUpdate`]s back.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Composes the components and runs them on one tokio task |
//! | [`connection`] | Connection state machine, identity and connect timer |
//! | [`messages`] | Bounded message log and display records |
//! | [`typing`] | Local typing debounce and remote presence tracking |
//! | [`event`] | Wire events, channels and the JSON codec |
//! | [`transport`] | Transport trait the broker connection implements |
//! | [`broker`] | In-process loopback broker for tests and demos |
//! | [`username`] | Username validation and defaults |
//! | [`config`] | Environment-driven session tuning |

pub mod broker;
pub mod config;
pub mod connection;
pub mod event;
pub mod messages;
pub mod session;
pub mod transport;
pub mod typing;
pub mod username;

#[cfg(test)]
#[path = "log_capture_test.rs"]
mod log_capture;
