//! MQTT 5.0 broker library for the Aquila implementation.
//!
//! The pieces fit together like this: a transport (TCP, TLS or WebSocket)
//! accepts a byte stream and splits it into a [`connection::PacketSource`]
//! and a shared [`connection::ClientWriter`]. A per-connection
//! [`engine::ProtocolEngine`] reads packets one at a time and drives the
//! process-wide [`registry::Registry`], which owns every session, matches
//! topics against subscription filters and fans published messages out to
//! live writers or to the offline store.

pub mod auth;
pub mod connection;
pub mod engine;
pub mod error;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod tls;

mod session;
mod ws;
