//! Per-connection protocol engine.
//!
//! One engine runs per connected transport. It reads one packet at a time,
//! dispatches to the registry, and writes any response through the
//! connection's shared writer. The loop ends on DISCONNECT, transport
//! failure, a failed response write, or broker shutdown; in every case the
//! registry is told so the session can be suspended or dropped.

use tracing::{debug, warn};
use uuid::Uuid;

use aquila_core::{
    properties::{AssignedClientIdentifier, MaximumQoS},
    qos::QoS,
    reason::ReasonCode,
    Result,
};
use aquila_packets::{
    connack::{ConnAckFlags, ConnAckPacket, ConnAckProperties},
    connect::ConnectPacket,
    pingresp::PingRespPacket,
    puback::PubAckPacket,
    pubcomp::PubCompPacket,
    publish::PublishPacket,
    pubrec::PubRecPacket,
    pubrel::PubRelPacket,
    suback::{SubAckPacket, SubAckPayload},
    subscribe::SubscribePacket,
    unsuback::{UnsubAckPacket, UnsubAckPayload},
    unsubscribe::UnsubscribePacket,
    ControlPacket,
};

use crate::{
    connection::{ClientWriter, PacketSource},
    registry::Registry,
    shutdown::Shutdown,
};

enum Flow {
    Continue,
    Stop,
}

/// Drives one connection's packet stream against the registry.
pub struct ProtocolEngine<R> {
    source: R,
    writer: ClientWriter,
    registry: Registry,
    shutdown: Shutdown,
}

impl<R> ProtocolEngine<R>
where
    R: PacketSource,
{
    pub fn new(
        source: R,
        writer: ClientWriter,
        registry: Registry,
        shutdown: Shutdown,
    ) -> ProtocolEngine<R> {
        ProtocolEngine {
            source,
            writer,
            registry,
            shutdown,
        }
    }

    /// Run until the connection ends.
    pub async fn run(mut self) -> Result<()> {
        while !self.shutdown.is_shutdown() {
            let maybe_packet = tokio::select! {
                res = self.source.read_packet() => res,
                _ = self.shutdown.recv() => return Ok(()),
            };

            let packet = match maybe_packet {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    // Transport gone without a DISCONNECT.
                    self.registry.disconnect(self.writer.id()).await;
                    return Ok(());
                }
                Err(e) => {
                    self.registry.disconnect(self.writer.id()).await;
                    return Err(e);
                }
            };

            debug!("received {} packet", packet.kind());

            match self.handle_packet(packet).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return Ok(()),
                Err(e) => {
                    // A failed response write ends the connection.
                    self.registry.disconnect(self.writer.id()).await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn handle_packet(&mut self, packet: ControlPacket) -> Result<Flow> {
        match packet {
            ControlPacket::Connect(connect) => self.handle_connect(connect).await,
            ControlPacket::Publish(publish) => self.handle_publish(publish).await,
            ControlPacket::PubRel(pubrel) => self.handle_pubrel(pubrel).await,
            ControlPacket::Subscribe(subscribe) => self.handle_subscribe(subscribe).await,
            ControlPacket::Unsubscribe(unsubscribe) => self.handle_unsubscribe(unsubscribe).await,
            ControlPacket::PingReq(_) => {
                self.writer
                    .write(&ControlPacket::PingResp(PingRespPacket {}))
                    .await?;
                Ok(Flow::Continue)
            }
            ControlPacket::Disconnect(_) => {
                self.registry.disconnect(self.writer.id()).await;
                Ok(Flow::Stop)
            }
            other => {
                // AUTH and client-side acks are not part of this broker's
                // v5 surface yet.
                debug!("ignoring {} packet", other.kind());
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_connect(&mut self, mut connect: ConnectPacket) -> Result<Flow> {
        if connect.payload.client_id.is_empty() {
            connect.payload.client_id = Uuid::new_v4().hyphenated().to_string();
            debug!(
                client_id = %connect.payload.client_id,
                "assigned generated client id"
            );
        }

        let reply = self.registry.add_client(self.writer.clone(), &connect).await;

        let connack = ConnAckPacket {
            flags: ConnAckFlags {
                session_present: reply.session_present,
            },
            reason_code: reply.reason_code,
            properties: Some(ConnAckProperties {
                maximum_qos: Some(MaximumQoS::new(reply.max_qos as u8)),
                assigned_client_id: Some(AssignedClientIdentifier::new(
                    connect.payload.client_id.clone(),
                )),
                ..Default::default()
            }),
        };

        self.writer.write(&ControlPacket::ConnAck(connack)).await?;

        if reply.reason_code == ReasonCode::Success {
            Ok(Flow::Continue)
        } else {
            // Rejected CONNECT: the CONNACK went out, now drop the stream.
            Ok(Flow::Stop)
        }
    }

    async fn handle_publish(&mut self, publish: PublishPacket) -> Result<Flow> {
        match publish.qos {
            QoS::AtMostOnce => {
                self.registry.publish(&publish).await;
            }
            QoS::AtLeastOnce => {
                let Some(packet_id) = publish.packet_id else {
                    return Err(ReasonCode::ProtocolError.into());
                };

                // Ack before fan-out so back-to-back publishes from the
                // same client never wait on delivery.
                self.writer
                    .write(&ControlPacket::PubAck(PubAckPacket {
                        packet_id,
                        reason: ReasonCode::Success,
                        properties: None,
                    }))
                    .await?;

                self.registry.publish(&publish).await;
            }
            QoS::ExactlyOnce => {
                let Some(packet_id) = publish.packet_id else {
                    return Err(ReasonCode::ProtocolError.into());
                };

                let reason = match self
                    .registry
                    .reserve_packet_id(self.writer.id(), packet_id)
                    .await
                {
                    Ok(()) => ReasonCode::Success,
                    Err(e) => {
                        warn!(packet_id, "could not reserve packet id: {}", e);
                        ReasonCode::ImplementationSpecificError
                    }
                };

                self.writer
                    .write(&ControlPacket::PubRec(PubRecPacket {
                        packet_id,
                        reason,
                        properties: None,
                    }))
                    .await?;

                self.registry.publish(&publish).await;
            }
            QoS::Invalid => return Err(ReasonCode::ProtocolError.into()),
        }

        Ok(Flow::Continue)
    }

    async fn handle_pubrel(&mut self, pubrel: PubRelPacket) -> Result<Flow> {
        let packet_id = pubrel.packet_id;

        if let Err(e) = self.registry.free_packet_id(self.writer.id(), packet_id).await {
            // PUBCOMP goes out regardless; the reservation lapses with the
            // session.
            warn!(packet_id, "could not free packet id: {}", e);
        }

        self.writer
            .write(&ControlPacket::PubComp(PubCompPacket {
                packet_id,
                reason: ReasonCode::Success,
                properties: None,
            }))
            .await?;

        Ok(Flow::Continue)
    }

    async fn handle_subscribe(&mut self, subscribe: SubscribePacket) -> Result<Flow> {
        match self.registry.subscribe(self.writer.id(), &subscribe).await {
            Ok(reasons) => {
                let ack = SubAckPacket {
                    packet_id: subscribe.packet_id,
                    properties: None,
                    payload: reasons
                        .into_iter()
                        .map(|reason_code| SubAckPayload { reason_code })
                        .collect(),
                };
                self.writer.write(&ControlPacket::SubAck(ack)).await?;
            }
            Err(e) => warn!("dropping subscribe from unknown connection: {}", e),
        }

        Ok(Flow::Continue)
    }

    async fn handle_unsubscribe(&mut self, unsubscribe: UnsubscribePacket) -> Result<Flow> {
        match self
            .registry
            .unsubscribe(self.writer.id(), &unsubscribe)
            .await
        {
            Ok(reasons) => {
                let ack = UnsubAckPacket {
                    packet_id: unsubscribe.packet_id,
                    properties: None,
                    payload: reasons
                        .into_iter()
                        .map(|reason_code| UnsubAckPayload { reason_code })
                        .collect(),
                };
                self.writer.write(&ControlPacket::UnsubAck(ack)).await?;
            }
            Err(e) => warn!("dropping unsubscribe from unknown connection: {}", e),
        }

        Ok(Flow::Continue)
    }
}
