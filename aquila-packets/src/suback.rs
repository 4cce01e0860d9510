use bytes::{Buf, BufMut, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

use crate::ack::AckProperties;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubAckPayload {
    pub reason_code: ReasonCode,
}

impl Encoder for SubAckPayload {
    fn encode(&self, buffer: &mut BytesMut) {
        self.reason_code.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

/// SUBACK, one reason byte per requested subscription, in request order.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub properties: Option<AckProperties>,
    pub payload: Vec<SubAckPayload>,
}

const PACKET_TYPE: u8 = 0x09;

impl Encoder for SubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        let props_len = self.properties.encoded_size();
        let remaining_len = self.packet_id.encoded_size()
            + VariableByteInteger(props_len as u32).encoded_size()
            + props_len
            + self.payload.encoded_size();

        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.packet_id.encode(buffer);
        VariableByteInteger(props_len as u32).encode(buffer);
        self.properties.encode(buffer);
        self.payload.encode(buffer);
    }
}

impl Decoder for SubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining = VariableByteInteger::decode(buffer)?;

        let packet_id = u16::decode(buffer)?;
        let properties = Some(AckProperties::decode(buffer)?);

        let mut payload = Vec::new();
        while buffer.has_remaining() {
            payload.push(SubAckPayload {
                reason_code: ReasonCode::decode(buffer)?,
            });
        }

        Ok(SubAckPacket {
            packet_id,
            properties,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suback_round_trip() {
        let expected = vec![0x90, 0x05, 0x00, 0x01, 0x00, 0x00, 0x83];

        let packet = SubAckPacket {
            packet_id: 1,
            properties: Some(AckProperties::default()),
            payload: vec![
                SubAckPayload {
                    reason_code: ReasonCode::GrantedQoS0,
                },
                SubAckPayload {
                    reason_code: ReasonCode::ImplementationSpecificError,
                },
            ],
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let decoded = SubAckPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded.payload.len(), 2);
        // GrantedQoS0 and Success share a value; decoding yields Success.
        assert_eq!(decoded.payload[0].reason_code.value(), 0x00);
        assert_eq!(
            decoded.payload[1].reason_code,
            ReasonCode::ImplementationSpecificError
        );
    }
}
