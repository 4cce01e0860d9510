use bytes::{Buf, BufMut, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

use crate::ack::AckProperties;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UnsubAckPayload {
    pub reason_code: ReasonCode,
}

impl Encoder for UnsubAckPayload {
    fn encode(&self, buffer: &mut BytesMut) {
        self.reason_code.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

/// UNSUBACK, one reason byte per requested filter, in request order.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
    pub properties: Option<AckProperties>,
    pub payload: Vec<UnsubAckPayload>,
}

const PACKET_TYPE: u8 = 0x0b;

impl Encoder for UnsubAckPacket {
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

impl Decoder for UnsubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining = VariableByteInteger::decode(buffer)?;

        let packet_id = u16::decode(buffer)?;
        let properties = Some(AckProperties::decode(buffer)?);

        let mut payload = Vec::new();
        while buffer.has_remaining() {
            payload.push(UnsubAckPayload {
                reason_code: ReasonCode::decode(buffer)?,
            });
        }

        Ok(UnsubAckPacket {
            packet_id,
            properties,
            payload,
        })
    }
}
