use bytes::{Buf, BufMut, BytesMut};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

use crate::ack::AckProperties;

/// First acknowledgement of a QoS 2 PUBLISH.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PubRecPacket {
    pub packet_id: u16,
    pub reason: ReasonCode,
    pub properties: Option<AckProperties>,
}

const PACKET_TYPE: u8 = 0x05;

impl Encoder for PubRecPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

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

impl Decoder for PubRecPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);

        let remaining = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        if remaining.0 == 2 {
            return Ok(PubRecPacket {
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

        Ok(PubRecPacket {
            packet_id,
            reason,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubrec_round_trip() {
        let packet = PubRecPacket {
            packet_id: 9,
            reason: ReasonCode::ImplementationSpecificError,
            properties: Some(AckProperties::default()),
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0x50, 0x04, 0x00, 0x09, 0x83, 0x00]);

        let decoded = PubRecPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }
}
