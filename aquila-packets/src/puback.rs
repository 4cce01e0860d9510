use bytes::{Buf, BufMut, BytesMut};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

use crate::ack::AckProperties;

/// Acknowledgement for a QoS 1 PUBLISH.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PubAckPacket {
    pub packet_id: u16,
    pub reason: ReasonCode,
    pub properties: Option<AckProperties>,
}

const PACKET_TYPE: u8 = 0x04;

impl Encoder for PubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        let mut remaining_len = self.packet_id.encoded_size();

        // Reason and properties can be left out entirely on plain success.
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

impl Decoder for PubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);

        let remaining = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        if remaining.0 == 2 {
            return Ok(PubAckPacket {
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

        Ok(PubAckPacket {
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
    fn success_encodes_to_two_byte_body() {
        let packet = PubAckPacket {
            packet_id: 7,
            reason: ReasonCode::Success,
            properties: None,
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0x40, 0x02, 0x00, 0x07]);

        let decoded = PubAckPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn non_success_carries_the_reason() {
        let packet = PubAckPacket {
            packet_id: 1,
            reason: ReasonCode::NoMatchingSubscribers,
            properties: Some(AckProperties::default()),
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0x40, 0x04, 0x00, 0x01, 0x10, 0x00]);

        let decoded = PubAckPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }
}
