use bytes::{Buf, BufMut, BytesMut};

use aquila_core::codec::{Decoder, Encoder, VariableByteInteger};

/// PINGRESP, the broker's answer to PINGREQ.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PingRespPacket {}

const PACKET_TYPE: u8 = 0x0d;

impl Encoder for PingRespPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        buffer.put_u8(0x00);
    }

    fn encoded_size(&self) -> usize {
        2
    }
}

impl Decoder for PingRespPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining = VariableByteInteger::decode(buffer)?;

        Ok(PingRespPacket {})
    }
}
