//! Offline-delivery storage for the Aquila MQTT broker.
//!
//! The broker hands undelivered PUBLISH packets for suspended persistent
//! sessions to an [`OfflineStore`], along with the reserved packet-ID set
//! that backs the QoS 2 handshake. Three backends are provided: in-memory
//! (default), embedded SQLite (`sqlite` feature) and Redis (`redis`
//! feature).

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use aquila_packets::publish::PublishPacket;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("stored packet is not decodable: {0}")]
    Codec(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable per-client state the broker delegates to a backend.
///
/// Implementations honor the Message-Expiry property of queued packets as a
/// per-entry time-to-live and may impose their own size caps; an eviction
/// still counts as a successful save.
#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Append a PUBLISH to the client's offline queue.
    async fn save_for_offline(&self, client_id: &str, publish: &PublishPacket) -> Result<()>;

    /// Return and remove all queued packets for the client, oldest first.
    async fn get_missed(&self, client_id: &str) -> Result<Vec<PublishPacket>>;

    /// Mark a QoS 2 packet ID as in flight for the client. Reserving an
    /// already-reserved ID is not an error.
    async fn reserve_packet_id(&self, client_id: &str, packet_id: u16) -> Result<()>;

    /// Release a previously reserved packet ID.
    async fn free_packet_id(&self, client_id: &str, packet_id: u16) -> Result<()>;

    /// True while `packet_id` is reserved for the client.
    async fn check_reuse(&self, client_id: &str, packet_id: u16) -> Result<bool>;

    /// Drop everything stored for the client: queued messages and reserved
    /// packet IDs. Used when a session is taken over with clean start.
    async fn purge(&self, client_id: &str) -> Result<()>;
}

/// Encode a PUBLISH into its wire form for storage.
#[cfg(any(feature = "sqlite", feature = "redis"))]
pub(crate) fn encode_publish(publish: &PublishPacket) -> Vec<u8> {
    use aquila_core::codec::Encoder;

    let mut buffer = bytes::BytesMut::new();
    publish.encode(&mut buffer);
    buffer.to_vec()
}

/// Decode a stored PUBLISH back from its wire form.
#[cfg(any(feature = "sqlite", feature = "redis"))]
pub(crate) fn decode_publish(bytes: &[u8]) -> Result<PublishPacket> {
    use aquila_core::codec::Decoder;

    let mut buffer = bytes;
    PublishPacket::decode(&mut buffer).map_err(|e| StorageError::Codec(e.to_string()))
}
