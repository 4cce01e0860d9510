//! The session registry: one entry per client, plus the routing fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use aquila_core::{
    qos::QoS,
    reason::ReasonCode,
    topic::{match_filter, FilterMatch},
};
use aquila_packets::{
    connect::ConnectPacket, publish::PublishPacket, subscribe::SubscribePacket,
    unsubscribe::UnsubscribePacket, ControlPacket,
};
use aquila_storage::OfflineStore;

use crate::{
    auth::Authenticator, connection::ClientWriter, error::ServerError, session::Session,
};

/// Broker-wide limits and collaborators.
pub struct BrokerOptions {
    /// Highest QoS granted to subscribers; higher requests are refused.
    pub max_qos: QoS,
    /// Credential validator for CONNECT; absent means open access.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Offline store; absent disables offline delivery.
    pub store: Option<Arc<dyn OfflineStore>>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        BrokerOptions {
            max_qos: QoS::ExactlyOnce,
            authenticator: None,
            store: None,
        }
    }
}

/// What a CONNECT resolves to; the engine turns this into a CONNACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectReply {
    pub reason_code: ReasonCode,
    pub session_present: bool,
    pub max_qos: QoS,
}

/// Process-wide map of client ID to session.
///
/// Lookups take the read lock; any mutation of the map, a session's
/// subscriptions or its `connected` flag takes the write lock. The publish
/// fan-out runs under the read lock and only touches writers, which carry
/// their own per-connection mutex.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

struct Shared {
    state: RwLock<HashMap<String, Session>>,
    options: BrokerOptions,
}

impl Registry {
    pub fn new(options: BrokerOptions) -> Registry {
        Registry {
            shared: Arc::new(Shared {
                state: RwLock::new(HashMap::new()),
                options,
            }),
        }
    }

    pub fn max_qos(&self) -> QoS {
        self.shared.options.max_qos
    }

    /// Register (or take over, or resume) the session for a CONNECT.
    ///
    /// The caller has already replaced an empty client ID with a generated
    /// one, so `connect.payload.client_id` is never empty here.
    pub async fn add_client(&self, writer: ClientWriter, connect: &ConnectPacket) -> ConnectReply {
        let max_qos = self.shared.options.max_qos;
        let client_id = connect.payload.client_id.as_str();

        if let Some(authenticator) = &self.shared.options.authenticator {
            let username = connect.payload.user_name.as_deref().unwrap_or_default();
            let password = connect.payload.password.as_deref().unwrap_or_default();

            if let Err(e) = authenticator.validate(username, password) {
                warn!(client_id, "authentication failed: {}", e);
                return ConnectReply {
                    reason_code: ReasonCode::NotAuthorized,
                    session_present: false,
                    max_qos,
                };
            }
        }

        let clean_start = connect.flags.clean_start;
        let mut resumed_writer = None;
        let mut purge_needed = false;

        {
            let mut state = self.shared.state.write().await;

            if state.contains_key(client_id) {
                if clean_start {
                    info!(client_id, "replacing session on clean-start take-over");
                    state.insert(
                        client_id.to_string(),
                        Session::new(client_id.to_string(), writer, true),
                    );
                    purge_needed = true;
                } else {
                    info!(client_id, "resuming session on new connection");
                    if let Some(session) = state.get_mut(client_id) {
                        session.resume(writer.clone());
                    }
                    resumed_writer = Some(writer);
                }
            } else {
                info!(client_id, "creating session");
                state.insert(
                    client_id.to_string(),
                    Session::new(client_id.to_string(), writer, clean_start),
                );
            }
        }

        if purge_needed {
            if let Some(store) = &self.shared.options.store {
                if let Err(e) = store.purge(client_id).await {
                    error!(client_id, "failed to purge offline state: {}", e);
                }
            }
        }

        let session_present = resumed_writer.is_some();
        if let Some(writer) = resumed_writer {
            self.deliver_missed(client_id, &writer).await;
        }

        ConnectReply {
            reason_code: ReasonCode::Success,
            session_present,
            max_qos,
        }
    }

    /// Drain the offline queue into a freshly resumed connection. Entries
    /// that fail to write go back into the store.
    async fn deliver_missed(&self, client_id: &str, writer: &ClientWriter) {
        let Some(store) = &self.shared.options.store else {
            return;
        };

        let missed = match store.get_missed(client_id).await {
            Ok(missed) => missed,
            Err(e) => {
                error!(client_id, "failed to fetch offline messages: {}", e);
                return;
            }
        };

        if !missed.is_empty() {
            info!(client_id, count = missed.len(), "delivering missed messages");
        }

        for publish in missed {
            if let Err(e) = writer
                .write(&ControlPacket::Publish(publish.clone()))
                .await
            {
                warn!(client_id, "redelivery failed, re-queueing: {}", e);
                if let Err(e) = store.save_for_offline(client_id, &publish).await {
                    error!(client_id, "failed to re-queue offline message: {}", e);
                }
            }
        }
    }

    /// Handle the end of the connection behind `writer_id`, whether from a
    /// DISCONNECT packet or a dead transport. Clean sessions are dropped;
    /// persistent ones are suspended. Unknown writers are a no-op (the
    /// stream may have been taken over already).
    pub async fn disconnect(&self, writer_id: u64) {
        let mut state = self.shared.state.write().await;

        let Some(client_id) = state
            .iter()
            .find(|(_, session)| session.writer_id() == Some(writer_id))
            .map(|(client_id, _)| client_id.clone())
        else {
            return;
        };

        let Some(session) = state.get_mut(&client_id) else {
            return;
        };

        if session.clean_start {
            info!(client_id = %client_id, "dropping clean session on disconnect");
            state.remove(&client_id);
        } else {
            info!(client_id = %client_id, "suspending session on disconnect");
            session.suspend();
        }
    }

    /// Fan a PUBLISH out to every matching subscriber.
    ///
    /// Non-shared matches go to live writers, or to the offline store for
    /// suspended persistent sessions. Shared matches are bucketed by group
    /// and exactly one member per group receives the message; shared
    /// delivery is best effort and never falls back to the store.
    pub async fn publish(&self, publish: &PublishPacket) {
        let store = self.shared.options.store.as_ref();
        let mut shared_groups: HashMap<String, Vec<ClientWriter>> = HashMap::new();
        let mut dead = Vec::new();

        {
            let state = self.shared.state.read().await;

            for session in state.values() {
                for filter in session.subscriptions.keys() {
                    match match_filter(&publish.topic_name, filter) {
                        FilterMatch::Miss => {}
                        FilterMatch::Plain => {
                            if session.connected {
                                if let Some(writer) = &session.writer {
                                    if let Err(e) = writer
                                        .write(&ControlPacket::Publish(publish.clone()))
                                        .await
                                    {
                                        warn!(
                                            client_id = %session.client_id,
                                            "dropping subscriber after failed write: {}", e
                                        );
                                        dead.push(writer.id());
                                    }
                                }
                            } else if !session.clean_start {
                                if let Some(store) = store {
                                    debug!(
                                        client_id = %session.client_id,
                                        "queueing message for offline delivery"
                                    );
                                    if let Err(e) =
                                        store.save_for_offline(&session.client_id, publish).await
                                    {
                                        error!(
                                            client_id = %session.client_id,
                                            "failed to save offline message: {}", e
                                        );
                                    }
                                }
                            }
                        }
                        FilterMatch::Shared(group) => {
                            if session.connected {
                                if let Some(writer) = &session.writer {
                                    shared_groups.entry(group).or_default().push(writer.clone());
                                }
                            }
                        }
                    }
                }
            }
        }

        for (group, writers) in shared_groups {
            let index = if writers.len() == 1 {
                0
            } else {
                rand::thread_rng().gen_range(0..writers.len())
            };

            let writer = &writers[index];
            if let Err(e) = writer
                .write(&ControlPacket::Publish(publish.clone()))
                .await
            {
                warn!(group = %group, "shared delivery failed: {}", e);
                dead.push(writer.id());
            }
        }

        // Failed writes count as disconnects of the target sessions.
        for writer_id in dead {
            self.disconnect(writer_id).await;
        }
    }

    /// Record the requested subscriptions and produce one reason byte per
    /// request, in request order.
    pub async fn subscribe(
        &self,
        writer_id: u64,
        subscribe: &SubscribePacket,
    ) -> Result<Vec<ReasonCode>, ServerError> {
        let max_qos = self.shared.options.max_qos;
        let mut state = self.shared.state.write().await;
        let session = session_for_writer(&mut state, writer_id)?;

        let mut reasons = Vec::with_capacity(subscribe.payload.len());
        for request in &subscribe.payload {
            session
                .subscriptions
                .insert(request.topic_filter.clone(), request.options);

            let reason = if request.options.qos > max_qos {
                ReasonCode::ImplementationSpecificError
            } else {
                match request.options.qos {
                    QoS::AtMostOnce => ReasonCode::GrantedQoS0,
                    QoS::AtLeastOnce => ReasonCode::GrantedQoS1,
                    QoS::ExactlyOnce => ReasonCode::GrantedQoS2,
                    QoS::Invalid => ReasonCode::UnspecifiedError,
                }
            };
            reasons.push(reason);
        }

        Ok(reasons)
    }

    /// Remove the listed filters, reporting per-filter success or
    /// no-subscription-existed.
    pub async fn unsubscribe(
        &self,
        writer_id: u64,
        unsubscribe: &UnsubscribePacket,
    ) -> Result<Vec<ReasonCode>, ServerError> {
        let mut state = self.shared.state.write().await;
        let session = session_for_writer(&mut state, writer_id)?;

        let mut reasons = Vec::with_capacity(unsubscribe.payload.len());
        for request in &unsubscribe.payload {
            let reason = if session.subscriptions.remove(&request.topic_filter).is_some() {
                ReasonCode::Success
            } else {
                ReasonCode::NoSubscriptionExisted
            };
            reasons.push(reason);
        }

        Ok(reasons)
    }

    /// Reserve a QoS 2 packet ID ahead of PUBREC.
    pub async fn reserve_packet_id(
        &self,
        writer_id: u64,
        packet_id: u16,
    ) -> Result<(), ServerError> {
        let client_id = self.client_for_writer(writer_id).await?;

        if let Some(store) = &self.shared.options.store {
            store.reserve_packet_id(&client_id, packet_id).await?;
        }

        let mut state = self.shared.state.write().await;
        if let Ok(session) = session_for_writer(&mut state, writer_id) {
            session.inflight_qos2.insert(packet_id);
        }

        Ok(())
    }

    /// Release a QoS 2 packet ID on PUBREL.
    pub async fn free_packet_id(&self, writer_id: u64, packet_id: u16) -> Result<(), ServerError> {
        let client_id = self.client_for_writer(writer_id).await?;

        {
            let mut state = self.shared.state.write().await;
            if let Ok(session) = session_for_writer(&mut state, writer_id) {
                session.inflight_qos2.remove(&packet_id);
            }
        }

        if let Some(store) = &self.shared.options.store {
            store.free_packet_id(&client_id, packet_id).await?;
        }

        Ok(())
    }

    async fn client_for_writer(&self, writer_id: u64) -> Result<String, ServerError> {
        let state = self.shared.state.read().await;
        state
            .values()
            .find(|session| session.writer_id() == Some(writer_id))
            .map(|session| session.client_id.clone())
            .ok_or(ServerError::UnknownWriter)
    }
}

fn session_for_writer(
    state: &mut HashMap<String, Session>,
    writer_id: u64,
) -> Result<&mut Session, ServerError> {
    state
        .values_mut()
        .find(|session| session.writer_id() == Some(writer_id))
        .ok_or(ServerError::UnknownWriter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use aquila_packets::{
        connect::{ConnectFlags, ConnectPayload},
        publish::PublishPacket,
        subscribe::{SubscribePayload, SubscriptionOptions},
        unsubscribe::UnsubscribePayload,
    };
    use aquila_storage::memory::MemoryStore;

    use crate::auth::AuthError;
    use crate::connection::PacketSink;

    struct CaptureSink {
        packets: Arc<Mutex<Vec<ControlPacket>>>,
    }

    #[async_trait]
    impl PacketSink for CaptureSink {
        async fn write_packet(&mut self, packet: &ControlPacket) -> aquila_core::Result<()> {
            self.packets.lock().unwrap().push(packet.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl PacketSink for FailingSink {
        async fn write_packet(&mut self, _packet: &ControlPacket) -> aquila_core::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into())
        }
    }

    struct RejectAll;

    impl Authenticator for RejectAll {
        fn validate(&self, _username: &str, _password: &[u8]) -> Result<(), AuthError> {
            Err(AuthError::BadCredentials)
        }
    }

    fn capture_writer() -> (ClientWriter, Arc<Mutex<Vec<ControlPacket>>>) {
        let packets = Arc::new(Mutex::new(Vec::new()));
        let writer = ClientWriter::new(Box::new(CaptureSink {
            packets: Arc::clone(&packets),
        }));
        (writer, packets)
    }

    fn connect(client_id: &str, clean_start: bool) -> ConnectPacket {
        ConnectPacket {
            flags: ConnectFlags {
                clean_start,
                ..Default::default()
            },
            keepalive: 60,
            properties: None,
            payload: ConnectPayload {
                client_id: client_id.to_string(),
                ..Default::default()
            },
        }
    }

    fn publish_to(topic: &str, payload: &str) -> PublishPacket {
        PublishPacket {
            topic_name: topic.to_string(),
            payload: Some(Bytes::from(payload.to_string())),
            ..Default::default()
        }
    }

    fn subscribe_to(filters: &[(&str, QoS)]) -> SubscribePacket {
        SubscribePacket {
            packet_id: 1,
            properties: None,
            payload: filters
                .iter()
                .map(|(filter, qos)| SubscribePayload {
                    topic_filter: filter.to_string(),
                    options: SubscriptionOptions {
                        qos: *qos,
                        ..Default::default()
                    },
                })
                .collect(),
        }
    }

    fn published_payloads(packets: &Arc<Mutex<Vec<ControlPacket>>>) -> Vec<Bytes> {
        packets
            .lock()
            .unwrap()
            .iter()
            .filter_map(|packet| match packet {
                ControlPacket::Publish(p) => p.payload.clone(),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn rejected_credentials_return_not_authorized() {
        let registry = Registry::new(BrokerOptions {
            authenticator: Some(Arc::new(RejectAll)),
            ..Default::default()
        });

        let (writer, _) = capture_writer();
        let reply = registry.add_client(writer, &connect("abcd", true)).await;

        assert_eq!(reply.reason_code.value(), 135);
        assert!(!reply.session_present);
        assert_eq!(reply.max_qos, QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn fresh_client_has_no_session_present() {
        let registry = Registry::new(BrokerOptions::default());

        let (writer, _) = capture_writer();
        let reply = registry.add_client(writer, &connect("abcd", true)).await;

        assert_eq!(reply.reason_code, ReasonCode::Success);
        assert!(!reply.session_present);
    }

    #[tokio::test]
    async fn unknown_client_with_persistent_connect_has_no_session_present() {
        let registry = Registry::new(BrokerOptions::default());

        let (writer, _) = capture_writer();
        let reply = registry.add_client(writer, &connect("abcd", false)).await;

        assert!(!reply.session_present);
    }

    #[tokio::test]
    async fn reconnect_resumes_existing_session() {
        let registry = Registry::new(BrokerOptions::default());

        let (first, _) = capture_writer();
        registry.add_client(first, &connect("abcd", false)).await;

        let (second, _) = capture_writer();
        let reply = registry.add_client(second, &connect("abcd", false)).await;

        assert_eq!(reply.reason_code, ReasonCode::Success);
        assert!(reply.session_present);
    }

    #[tokio::test]
    async fn clean_start_take_over_discards_subscriptions() {
        let registry = Registry::new(BrokerOptions::default());

        let (first, _) = capture_writer();
        registry.add_client(first.clone(), &connect("abcd", false)).await;
        registry
            .subscribe(first.id(), &subscribe_to(&[("foo", QoS::AtMostOnce)]))
            .await
            .unwrap();

        let (second, packets) = capture_writer();
        let reply = registry.add_client(second, &connect("abcd", true)).await;
        assert!(!reply.session_present);

        registry.publish(&publish_to("foo", "hello")).await;
        assert!(published_payloads(&packets).is_empty());
    }

    #[tokio::test]
    async fn matching_subscriber_receives_publish() {
        let registry = Registry::new(BrokerOptions::default());

        let (subscriber, packets) = capture_writer();
        registry
            .add_client(subscriber.clone(), &connect("sub", true))
            .await;
        registry
            .subscribe(subscriber.id(), &subscribe_to(&[("foo", QoS::AtMostOnce)]))
            .await
            .unwrap();

        registry.publish(&publish_to("foo", "Hello")).await;
        registry.publish(&publish_to("bar", "nope")).await;

        let payloads = published_payloads(&packets);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].as_ref(), b"Hello");
    }

    #[tokio::test]
    async fn subscribe_above_max_qos_is_refused_per_slot() {
        let registry = Registry::new(BrokerOptions {
            max_qos: QoS::AtLeastOnce,
            ..Default::default()
        });

        let (writer, _) = capture_writer();
        registry.add_client(writer.clone(), &connect("abcd", true)).await;

        let reasons = registry
            .subscribe(
                writer.id(),
                &subscribe_to(&[
                    ("a", QoS::AtMostOnce),
                    ("b", QoS::ExactlyOnce),
                    ("c", QoS::AtLeastOnce),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(
            reasons,
            vec![
                ReasonCode::GrantedQoS0,
                ReasonCode::ImplementationSpecificError,
                ReasonCode::GrantedQoS1,
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribe_reports_per_filter_outcome() {
        let registry = Registry::new(BrokerOptions::default());

        let (writer, _) = capture_writer();
        registry.add_client(writer.clone(), &connect("abcd", true)).await;
        registry
            .subscribe(writer.id(), &subscribe_to(&[("foo", QoS::AtMostOnce)]))
            .await
            .unwrap();

        let reasons = registry
            .unsubscribe(
                writer.id(),
                &UnsubscribePacket {
                    packet_id: 2,
                    properties: None,
                    payload: vec![
                        UnsubscribePayload {
                            topic_filter: "foo".to_string(),
                        },
                        UnsubscribePayload {
                            topic_filter: "missing".to_string(),
                        },
                    ],
                },
            )
            .await
            .unwrap();

        assert_eq!(
            reasons,
            vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted]
        );
    }

    #[tokio::test]
    async fn operations_from_unknown_writers_fail() {
        let registry = Registry::new(BrokerOptions::default());

        let result = registry
            .subscribe(999, &subscribe_to(&[("foo", QoS::AtMostOnce)]))
            .await;

        assert!(matches!(result, Err(ServerError::UnknownWriter)));
    }

    #[tokio::test]
    async fn suspended_persistent_session_queues_offline() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(BrokerOptions {
            store: Some(store.clone()),
            ..Default::default()
        });

        let (writer, _) = capture_writer();
        registry.add_client(writer.clone(), &connect("abcd", false)).await;
        registry
            .subscribe(writer.id(), &subscribe_to(&[("foo", QoS::AtMostOnce)]))
            .await
            .unwrap();

        registry.disconnect(writer.id()).await;

        registry.publish(&publish_to("foo", "m1")).await;
        registry.publish(&publish_to("foo", "m2")).await;

        // Reconnect drains the queue, in order, into the new writer.
        let (fresh, packets) = capture_writer();
        let reply = registry.add_client(fresh, &connect("abcd", false)).await;
        assert!(reply.session_present);

        let payloads = published_payloads(&packets);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].as_ref(), b"m1");
        assert_eq!(payloads[1].as_ref(), b"m2");

        assert!(store.get_missed("abcd").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn suspended_clean_session_gets_nothing() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(BrokerOptions {
            store: Some(store.clone()),
            ..Default::default()
        });

        // A clean session is removed on disconnect, so there is nothing to
        // route to afterwards.
        let (writer, _) = capture_writer();
        registry.add_client(writer.clone(), &connect("abcd", true)).await;
        registry
            .subscribe(writer.id(), &subscribe_to(&[("foo", QoS::AtMostOnce)]))
            .await
            .unwrap();
        registry.disconnect(writer.id()).await;

        registry.publish(&publish_to("foo", "m1")).await;

        assert!(store.get_missed("abcd").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_group_receives_exactly_one_copy() {
        let registry = Registry::new(BrokerOptions::default());

        let (first, first_packets) = capture_writer();
        registry.add_client(first.clone(), &connect("a1", true)).await;
        registry
            .subscribe(
                first.id(),
                &subscribe_to(&[("$share/g/foo", QoS::AtMostOnce)]),
            )
            .await
            .unwrap();

        let (second, second_packets) = capture_writer();
        registry.add_client(second.clone(), &connect("a2", true)).await;
        registry
            .subscribe(
                second.id(),
                &subscribe_to(&[("$share/g/foo", QoS::AtMostOnce)]),
            )
            .await
            .unwrap();

        const ROUNDS: usize = 100;
        for _ in 0..ROUNDS {
            registry.publish(&publish_to("foo", "tick")).await;
        }

        let first_count = published_payloads(&first_packets).len();
        let second_count = published_payloads(&second_packets).len();

        assert_eq!(first_count + second_count, ROUNDS);
        assert!(first_count > 0, "first member never selected");
        assert!(second_count > 0, "second member never selected");
    }

    #[tokio::test]
    async fn failed_write_suspends_the_subscriber() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(BrokerOptions {
            store: Some(store.clone()),
            ..Default::default()
        });

        let broken = ClientWriter::new(Box::new(FailingSink));
        registry.add_client(broken.clone(), &connect("abcd", false)).await;
        registry
            .subscribe(broken.id(), &subscribe_to(&[("foo", QoS::AtMostOnce)]))
            .await
            .unwrap();

        registry.publish(&publish_to("foo", "m1")).await;

        // The broken subscriber is now suspended; the next publish lands in
        // the offline store.
        registry.publish(&publish_to("foo", "m2")).await;

        let missed = store.get_missed("abcd").await.unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].payload.as_ref().unwrap().as_ref(), b"m2");
    }

    #[tokio::test]
    async fn packet_id_reservation_delegates_to_store() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(BrokerOptions {
            store: Some(store.clone()),
            ..Default::default()
        });

        let (writer, _) = capture_writer();
        registry.add_client(writer.clone(), &connect("abcd", true)).await;

        registry.reserve_packet_id(writer.id(), 9).await.unwrap();
        assert!(store.check_reuse("abcd", 9).await.unwrap());

        registry.free_packet_id(writer.id(), 9).await.unwrap();
        assert!(!store.check_reuse("abcd", 9).await.unwrap());
    }
}
