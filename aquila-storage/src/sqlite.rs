//! Embedded SQLite storage backend.
//!
//! Persists the offline queues and reserved packet IDs across broker
//! restarts. A single connection behind a mutex is plenty for the write
//! rates involved; operations run on the blocking thread pool.

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use aquila_packets::publish::PublishPacket;

use crate::{decode_publish, encode_publish, OfflineStore, Result, StorageError};

/// SQLite-backed offline store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database, useful for tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::OperationFailed(e.to_string()))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS offline_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL,
                packet BLOB NOT NULL,
                expires_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_offline_client
                ON offline_messages(client_id);

            CREATE TABLE IF NOT EXISTS reserved_packet_ids (
                client_id TEXT NOT NULL,
                packet_id INTEGER NOT NULL,
                PRIMARY KEY (client_id, packet_id)
            );
            ",
        )?;

        Ok(())
    }

    /// Execute a blocking operation on the tokio blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StorageError::OperationFailed(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::OperationFailed(e.to_string()))?
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl OfflineStore for SqliteStore {
    async fn save_for_offline(&self, client_id: &str, publish: &PublishPacket) -> Result<()> {
        let client_id = client_id.to_string();
        let packet = encode_publish(publish);
        let expires_at = publish
            .message_expiry()
            .map(|seconds| unix_now() + seconds as i64);

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO offline_messages (client_id, packet, expires_at)
                 VALUES (?1, ?2, ?3)",
                params![client_id, packet, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_missed(&self, client_id: &str) -> Result<Vec<PublishPacket>> {
        let client_id = client_id.to_string();

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT packet, expires_at FROM offline_messages
                 WHERE client_id = ?1 ORDER BY id",
            )?;

            let rows = stmt.query_map(params![client_id.clone()], |row| {
                let packet: Vec<u8> = row.get(0)?;
                let expires_at: Option<i64> = row.get(1)?;
                Ok((packet, expires_at))
            })?;

            let now = unix_now();
            let mut messages = Vec::new();
            for row in rows {
                let (packet, expires_at) = row?;
                if expires_at.is_some_and(|at| at <= now) {
                    continue;
                }
                messages.push(decode_publish(&packet)?);
            }

            conn.execute(
                "DELETE FROM offline_messages WHERE client_id = ?1",
                params![client_id],
            )?;

            Ok(messages)
        })
        .await
    }

    async fn reserve_packet_id(&self, client_id: &str, packet_id: u16) -> Result<()> {
        let client_id = client_id.to_string();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO reserved_packet_ids (client_id, packet_id)
                 VALUES (?1, ?2)",
                params![client_id, packet_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn free_packet_id(&self, client_id: &str, packet_id: u16) -> Result<()> {
        let client_id = client_id.to_string();

        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM reserved_packet_ids WHERE client_id = ?1 AND packet_id = ?2",
                params![client_id, packet_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn check_reuse(&self, client_id: &str, packet_id: u16) -> Result<bool> {
        let client_id = client_id.to_string();

        self.blocking(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM reserved_packet_ids
                     WHERE client_id = ?1 AND packet_id = ?2",
                    params![client_id, packet_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn purge(&self, client_id: &str) -> Result<()> {
        let client_id = client_id.to_string();

        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM offline_messages WHERE client_id = ?1",
                params![client_id.clone()],
            )?;
            conn.execute(
                "DELETE FROM reserved_packet_ids WHERE client_id = ?1",
                params![client_id],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn publish(topic: &str, payload: &str) -> PublishPacket {
        PublishPacket {
            topic_name: topic.to_string(),
            payload: Some(Bytes::from(payload.to_string())),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn queue_round_trips_through_sqlite() {
        let store = SqliteStore::in_memory().unwrap();

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
        assert_eq!(missed[0].topic_name, "foo");
        assert_eq!(missed[0].payload.as_ref().unwrap().as_ref(), b"m1");
        assert_eq!(missed[1].payload.as_ref().unwrap().as_ref(), b"m2");

        assert!(store.get_missed("client1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reservations_round_trip_through_sqlite() {
        let store = SqliteStore::in_memory().unwrap();

        store.reserve_packet_id("client1", 42).await.unwrap();
        assert!(store.check_reuse("client1", 42).await.unwrap());
        assert!(!store.check_reuse("client2", 42).await.unwrap());

        store.free_packet_id("client1", 42).await.unwrap();
        assert!(!store.check_reuse("client1", 42).await.unwrap());
    }

    #[tokio::test]
    async fn purge_clears_both_tables() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .save_for_offline("client1", &publish("foo", "m1"))
            .await
            .unwrap();
        store.reserve_packet_id("client1", 1).await.unwrap();

        store.purge("client1").await.unwrap();

        assert!(store.get_missed("client1").await.unwrap().is_empty());
        assert!(!store.check_reuse("client1", 1).await.unwrap());
    }
}
