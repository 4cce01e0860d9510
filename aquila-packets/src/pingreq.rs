use bytes::{Buf, BufMut, BytesMut};

use aquila_core::codec::{Decoder, Encoder, VariableByteInteger};

/// PINGREQ, a keep-alive probe from the client.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PingReqPacket {}

const PACKET_TYPE: u8 = 0x0c;

impl Encoder for PingReqPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        buffer.put_u8(0x00);
    }

    fn encoded_size(&self) -> usize {
        2
    }
}

impl Decoder for PingReqPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining = VariableByteInteger::decode(buffer)?;

        Ok(PingReqPacket {})
    }
}
