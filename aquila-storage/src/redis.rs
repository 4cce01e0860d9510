//! Redis storage backend.
//!
//! Queued messages live in a per-client list, reserved packet IDs in
//! per-ID sentinel keys. Message-Expiry maps to a TTL on the queue key
//! that is only ever extended, never shrunk, and is dropped entirely once
//! a message with no expiry is queued, so the queue survives until the
//! furthest deadline of anything still in it. That is coarser than the
//! per-entry expiry the embedded backends provide, but a queue never
//! outlives its contents and never destroys them early.

use async_trait::async_trait;
use ::redis::{aio::MultiplexedConnection, AsyncCommands, Client, IntoConnectionInfo};

use aquila_packets::publish::PublishPacket;

use crate::{decode_publish, encode_publish, OfflineStore, Result};

const PACKET_RESERVED: u8 = 1;

fn queue_key(client_id: &str) -> String {
    format!("{}:queue", client_id)
}

fn packet_key(client_id: &str, packet_id: u16) -> String {
    format!("packet:{}:{}", client_id, packet_id)
}

/// TTL adjustment for a queue key after appending one message.
#[derive(Debug, PartialEq, Eq)]
enum TtlUpdate {
    /// Extend (or set) the expiry to this many seconds from now.
    Extend(i64),
    /// Make the key persistent; something queued never expires.
    Clear,
}

/// Decide how the queue's TTL changes for an appended message.
///
/// `current` is the TTL as Redis reports it for the existing queue: `-1`
/// when the key is persistent, which here means a queued message without
/// an expiry is still pending.
fn ttl_update(current: i64, expiry: Option<u32>) -> Option<TtlUpdate> {
    match expiry {
        // Never shrink the deadline of messages already queued.
        Some(seconds) => {
            let seconds = i64::from(seconds);
            (current >= 0 && current < seconds).then_some(TtlUpdate::Extend(seconds))
        }
        // A message with no expiry keeps the queue alive indefinitely.
        None => (current >= 0).then_some(TtlUpdate::Clear),
    }
}

/// Redis-backed offline store.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str, password: Option<&str>) -> Result<Self> {
        let mut info = url.into_connection_info()?;
        if let Some(password) = password {
            info.redis.password = Some(password.to_string());
        }

        let client = Client::open(info)?;
        let conn = client.get_multiplexed_tokio_connection().await?;

        Ok(RedisStore { conn })
    }
}

#[async_trait]
impl OfflineStore for RedisStore {
    async fn save_for_offline(&self, client_id: &str, publish: &PublishPacket) -> Result<()> {
        let key = queue_key(client_id);
        let mut conn = self.conn.clone();

        let length: i64 = conn.rpush(&key, encode_publish(publish)).await?;

        let update = if length == 1 {
            // Fresh key; its deadline is this message's alone.
            publish
                .message_expiry()
                .map(|seconds| TtlUpdate::Extend(i64::from(seconds)))
        } else {
            let current: i64 = conn.ttl(&key).await?;
            ttl_update(current, publish.message_expiry())
        };

        match update {
            Some(TtlUpdate::Extend(seconds)) => {
                let _: () = conn.expire(&key, seconds).await?;
            }
            Some(TtlUpdate::Clear) => {
                let _: () = conn.persist(&key).await?;
            }
            None => {}
        }

        Ok(())
    }

    async fn get_missed(&self, client_id: &str) -> Result<Vec<PublishPacket>> {
        let key = queue_key(client_id);
        let mut conn = self.conn.clone();

        let (entries,): (Vec<Vec<u8>>,) = ::redis::pipe()
            .atomic()
            .lrange(&key, 0, -1)
            .del(&key)
            .ignore()
            .query_async(&mut conn)
            .await?;

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            messages.push(decode_publish(&entry)?);
        }

        Ok(messages)
    }

    async fn reserve_packet_id(&self, client_id: &str, packet_id: u16) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(packet_key(client_id, packet_id), vec![PACKET_RESERVED])
            .await?;
        Ok(())
    }

    async fn free_packet_id(&self, client_id: &str, packet_id: u16) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(packet_key(client_id, packet_id)).await?;
        Ok(())
    }

    async fn check_reuse(&self, client_id: &str, packet_id: u16) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(packet_key(client_id, packet_id)).await?)
    }

    async fn purge(&self, client_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(queue_key(client_id)).await?;

        let pattern = format!("packet:{}:*", client_id);
        let mut keys = Vec::new();
        {
            let mut scan = conn.scan_match::<_, String>(&pattern).await?;
            while let Some(key) = scan.next_item().await {
                keys.push(key);
            }
        }

        if !keys.is_empty() {
            let _: () = conn.del(keys).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_deadlines_extend_the_queue_ttl() {
        assert_eq!(ttl_update(20, Some(3600)), Some(TtlUpdate::Extend(3600)));
    }

    #[test]
    fn shorter_deadlines_never_shrink_the_queue_ttl() {
        // A short-lived message appended after a long-lived one must not
        // pull the whole queue's deadline in.
        assert_eq!(ttl_update(3600, Some(10)), None);
        assert_eq!(ttl_update(10, Some(10)), None);
    }

    #[test]
    fn a_pending_message_without_expiry_pins_the_queue() {
        // Persistent key: something queued never expires, so an expiring
        // append must not introduce a deadline.
        assert_eq!(ttl_update(-1, Some(10)), None);
        assert_eq!(ttl_update(-1, None), None);
    }

    #[test]
    fn a_message_without_expiry_clears_the_queue_ttl() {
        assert_eq!(ttl_update(30, None), Some(TtlUpdate::Clear));
    }
}
