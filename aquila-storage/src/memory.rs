//! In-memory storage backend.
//!
//! Thread-safe, nothing survives a restart. The default backend and the one
//! the broker's tests run against.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use async_trait::async_trait;

use aquila_packets::publish::PublishPacket;

use crate::{OfflineStore, Result, StorageError};

struct QueuedMessage {
    publish: PublishPacket,
    expires_at: Option<Instant>,
}

impl QueuedMessage {
    fn new(publish: &PublishPacket) -> QueuedMessage {
        QueuedMessage {
            expires_at: publish
                .message_expiry()
                .map(|seconds| Instant::now() + Duration::from_secs(seconds.into())),
            publish: publish.clone(),
        }
    }

    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory offline store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    queues: Arc<RwLock<HashMap<String, VecDeque<QueuedMessage>>>>,
    reserved: Arc<RwLock<HashMap<String, HashSet<u16>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(e: T) -> StorageError
where
    T: std::fmt::Display,
{
    StorageError::OperationFailed(e.to_string())
}

#[async_trait]
impl OfflineStore for MemoryStore {
    async fn save_for_offline(&self, client_id: &str, publish: &PublishPacket) -> Result<()> {
        let mut queues = self.queues.write().map_err(poisoned)?;
        queues
            .entry(client_id.to_string())
            .or_default()
            .push_back(QueuedMessage::new(publish));
        Ok(())
    }

    async fn get_missed(&self, client_id: &str) -> Result<Vec<PublishPacket>> {
        let mut queues = self.queues.write().map_err(poisoned)?;

        let Some(queue) = queues.remove(client_id) else {
            return Ok(Vec::new());
        };

        Ok(queue
            .into_iter()
            .filter(|entry| !entry.expired())
            .map(|entry| entry.publish)
            .collect())
    }

    async fn reserve_packet_id(&self, client_id: &str, packet_id: u16) -> Result<()> {
        let mut reserved = self.reserved.write().map_err(poisoned)?;
        reserved
            .entry(client_id.to_string())
            .or_default()
            .insert(packet_id);
        Ok(())
    }

    async fn free_packet_id(&self, client_id: &str, packet_id: u16) -> Result<()> {
        let mut reserved = self.reserved.write().map_err(poisoned)?;
        if let Some(ids) = reserved.get_mut(client_id) {
            ids.remove(&packet_id);
        }
        Ok(())
    }

    async fn check_reuse(&self, client_id: &str, packet_id: u16) -> Result<bool> {
        let reserved = self.reserved.read().map_err(poisoned)?;
        Ok(reserved
            .get(client_id)
            .is_some_and(|ids| ids.contains(&packet_id)))
    }

    async fn purge(&self, client_id: &str) -> Result<()> {
        self.queues.write().map_err(poisoned)?.remove(client_id);
        self.reserved.write().map_err(poisoned)?.remove(client_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquila_core::properties::MessageExpiryInterval;
    use aquila_packets::publish::PublishProperties;
    use bytes::Bytes;

    fn publish(topic: &str, payload: &str) -> PublishPacket {
        PublishPacket {
            topic_name: topic.to_string(),
            payload: Some(Bytes::from(payload.to_string())),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missed_messages_drain_in_order() {
        let store = MemoryStore::new();

        store
            .save_for_offline("client1", &publish("foo", "m1"))
            .await
            .unwrap();
        store
            .save_for_offline("client1", &publish("foo", "m2"))
            .await
            .unwrap();

        let missed = store.get_missed("client1").await.unwrap();
        assert_eq!(missed.len(), 2);
        assert_eq!(missed[0].payload.as_ref().unwrap().as_ref(), b"m1");
        assert_eq!(missed[1].payload.as_ref().unwrap().as_ref(), b"m2");

        // A second call finds nothing.
        assert!(store.get_missed("client1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_client_has_no_missed_messages() {
        let store = MemoryStore::new();
        assert!(store.get_missed("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let store = MemoryStore::new();

        let mut expiring = publish("foo", "gone");
        expiring.properties = Some(PublishProperties {
            message_expiry_interval: Some(MessageExpiryInterval::new(0)),
            ..Default::default()
        });

        store
            .save_for_offline("client1", &expiring)
            .await
            .unwrap();
        store
            .save_for_offline("client1", &publish("foo", "kept"))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let missed = store.get_missed("client1").await.unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].payload.as_ref().unwrap().as_ref(), b"kept");
    }

    #[tokio::test]
    async fn packet_id_reservation_lifecycle() {
        let store = MemoryStore::new();

        assert!(!store.check_reuse("client1", 9).await.unwrap());

        store.reserve_packet_id("client1", 9).await.unwrap();
        assert!(store.check_reuse("client1", 9).await.unwrap());

        // Reserving again is safe.
        store.reserve_packet_id("client1", 9).await.unwrap();

        store.free_packet_id("client1", 9).await.unwrap();
        assert!(!store.check_reuse("client1", 9).await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_queue_and_reservations() {
        let store = MemoryStore::new();

        store
            .save_for_offline("client1", &publish("foo", "m1"))
            .await
            .unwrap();
        store.reserve_packet_id("client1", 3).await.unwrap();

        store.purge("client1").await.unwrap();

        assert!(store.get_missed("client1").await.unwrap().is_empty());
        assert!(!store.check_reuse("client1", 3).await.unwrap());
    }
}
