//! Per-client session state.

use std::collections::{HashMap, HashSet};

use aquila_packets::subscribe::SubscriptionOptions;

use crate::connection::ClientWriter;

/// State the broker keeps for one logical client.
///
/// Sessions live exclusively inside the registry, which serializes all
/// access. A session is either connected (writer present) or suspended
/// (writer absent, only possible when the client asked for a persistent
/// session).
pub(crate) struct Session {
    pub(crate) client_id: String,
    pub(crate) writer: Option<ClientWriter>,
    pub(crate) clean_start: bool,
    pub(crate) connected: bool,
    /// Topic filter -> options, exactly as subscribed (shared filters keep
    /// their `$share/<group>/` prefix).
    pub(crate) subscriptions: HashMap<String, SubscriptionOptions>,
    /// QoS 2 packet IDs between PUBREC and PUBCOMP.
    pub(crate) inflight_qos2: HashSet<u16>,
}

impl Session {
    pub(crate) fn new(client_id: String, writer: ClientWriter, clean_start: bool) -> Session {
        Session {
            client_id,
            writer: Some(writer),
            clean_start,
            connected: true,
            subscriptions: HashMap::new(),
            inflight_qos2: HashSet::new(),
        }
    }

    pub(crate) fn writer_id(&self) -> Option<u64> {
        self.writer.as_ref().map(ClientWriter::id)
    }

    /// Connected -> Suspended; the network is gone but the session stays.
    pub(crate) fn suspend(&mut self) {
        self.connected = false;
        self.writer = None;
    }

    /// Suspended -> Connected on a resuming CONNECT.
    pub(crate) fn resume(&mut self, writer: ClientWriter) {
        self.writer = Some(writer);
        self.connected = true;
    }
}
