use bytes::{Buf, BufMut, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    properties::{Property, UserProperty},
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct UnsubscribeProperties {
    pub user_property: Option<Vec<UserProperty>>,
}

impl Encoder for UnsubscribeProperties {
    fn encode(&self, buffer: &mut BytesMut) {
        self.user_property.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.user_property.encoded_size()
    }
}

impl Decoder for UnsubscribeProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = UnsubscribeProperties::default();

        if len.0 == 0 {
            return Ok(properties);
        } else if (buffer.remaining() as u32) < len.0 {
            return Err(Error::Incomplete);
        }

        let mut encoded = buffer.take(len.0 as usize);

        while encoded.has_remaining() {
            match Property::decode(&mut encoded)? {
                Property::UserProperty(v) => {
                    if let Some(vec) = &mut properties.user_property {
                        vec.push(v);
                    } else {
                        properties.user_property = Some(vec![v]);
                    }
                }
                _ => return Err(ReasonCode::MalformedPacket.into()),
            }
        }

        Ok(properties)
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UnsubscribePayload {
    pub topic_filter: String,
}

impl Encoder for UnsubscribePayload {
    fn encode(&self, buffer: &mut BytesMut) {
        self.topic_filter.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.topic_filter.encoded_size()
    }
}

/// UNSUBSCRIBE, a batch of topic filters to drop.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub properties: Option<UnsubscribeProperties>,
    pub payload: Vec<UnsubscribePayload>,
}

const PACKET_TYPE: u8 = 0x0a;

impl Encoder for UnsubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        // UNSUBSCRIBE carries mandatory flag bits 0b0010 in the fixed header.
        buffer.put_u8(PACKET_TYPE << 4 | 0b0000_0010);

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

impl Decoder for UnsubscribePacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining = VariableByteInteger::decode(buffer)?;

        let packet_id = u16::decode(buffer)?;
        let properties = Some(UnsubscribeProperties::decode(buffer)?);

        if !buffer.has_remaining() {
            return Err(ReasonCode::ProtocolError.into());
        }

        let mut payload = Vec::new();
        while buffer.has_remaining() {
            payload.push(UnsubscribePayload {
                topic_filter: String::decode(buffer)?,
            });
        }

        Ok(UnsubscribePacket {
            packet_id,
            properties,
            payload,
        })
    }
}
