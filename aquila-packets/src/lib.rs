//! MQTT 5.0 control packet encoding and decoding.
//!
//! [`ControlPacket::check`] tells how many bytes the next complete packet
//! occupies in a read buffer; [`ControlPacket::parse`] decodes exactly one
//! packet. Callers are expected to hand `parse` a buffer holding a single
//! complete frame, typically obtained by `split_to(check(..)?)`.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod ack;
pub mod auth;
pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod pingreq;
pub mod pingresp;
pub mod puback;
pub mod pubcomp;
pub mod publish;
pub mod pubrec;
pub mod pubrel;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use bytes::BytesMut;

pub use aquila_core::Result;

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    reason::ReasonCode,
};

use crate::{
    auth::AuthPacket, connack::ConnAckPacket, connect::ConnectPacket, disconnect::DisconnectPacket,
    pingreq::PingReqPacket, pingresp::PingRespPacket, puback::PubAckPacket, pubcomp::PubCompPacket,
    publish::PublishPacket, pubrec::PubRecPacket, pubrel::PubRelPacket, suback::SubAckPacket,
    subscribe::SubscribePacket, unsuback::UnsubAckPacket, unsubscribe::UnsubscribePacket,
};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ControlPacket {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl ControlPacket {
    /// A short name for logging.
    pub fn kind(&self) -> &'static str {
        use ControlPacket::*;

        match self {
            Connect(_) => "CONNECT",
            ConnAck(_) => "CONNACK",
            Publish(_) => "PUBLISH",
            PubAck(_) => "PUBACK",
            PubRec(_) => "PUBREC",
            PubRel(_) => "PUBREL",
            PubComp(_) => "PUBCOMP",
            Subscribe(_) => "SUBSCRIBE",
            SubAck(_) => "SUBACK",
            Unsubscribe(_) => "UNSUBSCRIBE",
            UnsubAck(_) => "UNSUBACK",
            PingReq(_) => "PINGREQ",
            PingResp(_) => "PINGRESP",
            Disconnect(_) => "DISCONNECT",
            Auth(_) => "AUTH",
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 0x01,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
    Auth,
}

impl TryFrom<u8> for PacketType {
    type Error = ReasonCode;

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        use PacketType::*;

        let packet_type = match value {
            0x01 => Connect,
            0x02 => ConnAck,
            0x03 => Publish,
            0x04 => PubAck,
            0x05 => PubRec,
            0x06 => PubRel,
            0x07 => PubComp,
            0x08 => Subscribe,
            0x09 => SubAck,
            0x0a => Unsubscribe,
            0x0b => UnsubAck,
            0x0c => PingReq,
            0x0d => PingResp,
            0x0e => Disconnect,
            0x0f => Auth,
            _ => return Err(ReasonCode::MalformedPacket),
        };

        Ok(packet_type)
    }
}

impl ControlPacket {
    /// Check whether `src` starts with a complete packet.
    ///
    /// Returns the total frame length (fixed header included) when complete,
    /// or `Error::Incomplete` when more bytes are needed.
    pub fn check(src: &BytesMut) -> crate::Result<usize> {
        if src.len() < 2 {
            return Err(Error::Incomplete);
        }

        let mut peek = &src[1..];
        let remaining = VariableByteInteger::decode(&mut peek)?;
        let total = 1 + remaining.encoded_size() + remaining.0 as usize;

        if src.len() < total {
            return Err(Error::Incomplete);
        }

        Ok(total)
    }

    /// Parse a single complete packet from `src`.
    pub fn parse(src: &mut BytesMut) -> crate::Result<ControlPacket> {
        use ControlPacket::*;

        if src.is_empty() {
            return Err(Error::Incomplete);
        }
        let packet_type: u8 = src[0] >> 4;

        let packet = match packet_type.try_into()? {
            PacketType::Connect => Connect(ConnectPacket::decode(src)?),
            PacketType::ConnAck => ConnAck(ConnAckPacket::decode(src)?),
            PacketType::Publish => Publish(PublishPacket::decode(src)?),
            PacketType::PubAck => PubAck(PubAckPacket::decode(src)?),
            PacketType::PubRec => PubRec(PubRecPacket::decode(src)?),
            PacketType::PubRel => PubRel(PubRelPacket::decode(src)?),
            PacketType::PubComp => PubComp(PubCompPacket::decode(src)?),
            PacketType::Subscribe => Subscribe(SubscribePacket::decode(src)?),
            PacketType::SubAck => SubAck(SubAckPacket::decode(src)?),
            PacketType::Unsubscribe => Unsubscribe(UnsubscribePacket::decode(src)?),
            PacketType::UnsubAck => UnsubAck(UnsubAckPacket::decode(src)?),
            PacketType::PingReq => PingReq(PingReqPacket::decode(src)?),
            PacketType::PingResp => PingResp(PingRespPacket::decode(src)?),
            PacketType::Disconnect => Disconnect(DisconnectPacket::decode(src)?),
            PacketType::Auth => Auth(AuthPacket::decode(src)?),
        };

        Ok(packet)
    }
}

impl Encoder for ControlPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        use ControlPacket::*;

        match self {
            Connect(p) => p.encode(buffer),
            ConnAck(p) => p.encode(buffer),
            Publish(p) => p.encode(buffer),
            PubAck(p) => p.encode(buffer),
            PubRec(p) => p.encode(buffer),
            PubRel(p) => p.encode(buffer),
            PubComp(p) => p.encode(buffer),
            Subscribe(p) => p.encode(buffer),
            SubAck(p) => p.encode(buffer),
            Unsubscribe(p) => p.encode(buffer),
            UnsubAck(p) => p.encode(buffer),
            PingReq(p) => p.encode(buffer),
            PingResp(p) => p.encode(buffer),
            Disconnect(p) => p.encode(buffer),
            Auth(p) => p.encode(buffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reports_frame_length() {
        // PINGREQ followed by the first byte of another packet.
        let mut src = BytesMut::new();
        src.extend_from_slice(&[0xc0, 0x00, 0xc0]);

        assert_eq!(ControlPacket::check(&src).unwrap(), 2);
    }

    #[test]
    fn check_short_buffer_is_incomplete() {
        let mut src = BytesMut::new();
        src.extend_from_slice(&[0x30, 0x0a, 0x00]);

        match ControlPacket::check(&src) {
            Err(Error::Incomplete) => {}
            other => panic!("expected incomplete, got {:?}", other),
        }
    }

    #[test]
    fn parse_rejects_unknown_packet_type() {
        let mut src = BytesMut::new();
        src.extend_from_slice(&[0x00, 0x00]);

        assert!(ControlPacket::parse(&mut src).is_err());
    }
}
