use bytes::{Buf, BufMut, BytesMut};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

use crate::ack::AckProperties;

/// Second step of the QoS 2 handshake, sent by the publisher after PUBREC.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PubRelPacket {
    pub packet_id: u16,
    pub reason: ReasonCode,
    pub properties: Option<AckProperties>,
}

const PACKET_TYPE: u8 = 0x06;

impl Encoder for PubRelPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        // PUBREL carries mandatory flag bits 0b0010 in the fixed header.
        buffer.put_u8(PACKET_TYPE << 4 | 0b0000_0010);

        let mut remaining_len = self.packet_id.encoded_size();

        let full = self.properties.is_some() || self.reason != ReasonCode::Success;
        if full {
            remaining_len += self.reason.encoded_size();
            remaining_len +=
                VariableByteInteger(self.properties.encoded_size() as u32).encoded_size();
            remaining_len += self.properties.encoded_size();
        }

        VariableByteInteger(remaining_len as u32).encode(buffer);
        self.packet_id.encode(buffer);

        if full {
            self.reason.encode(buffer);
            VariableByteInteger(self.properties.encoded_size() as u32).encode(buffer);
            self.properties.encode(buffer);
        }
    }
}

impl Decoder for PubRelPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);

        let remaining = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        if remaining.0 == 2 {
            return Ok(PubRelPacket {
                packet_id,
                reason: ReasonCode::Success,
                properties: None,
            });
        }

        let reason = ReasonCode::decode(buffer)?;
        let properties = if remaining.0 >= 4 {
            Some(AckProperties::decode(buffer)?)
        } else {
            None
        };

        Ok(PubRelPacket {
            packet_id,
            reason,
            properties,
        })
    }
}
