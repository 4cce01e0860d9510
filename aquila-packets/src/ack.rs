//! Properties shared by the acknowledgement packets (PUBACK, PUBREC,
//! PUBREL, PUBCOMP, SUBACK, UNSUBACK).

use bytes::Buf;

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    properties::{Property, ReasonString, UserProperty},
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct AckProperties {
    pub reason_string: Option<ReasonString>,
    pub user_property: Option<Vec<UserProperty>>,
}

impl Encoder for AckProperties {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        self.reason_string.encode(buffer);
        self.user_property.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.reason_string.encoded_size() + self.user_property.encoded_size()
    }
}

impl Decoder for AckProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = AckProperties::default();

        if len.0 == 0 {
            return Ok(properties);
        } else if (buffer.remaining() as u32) < len.0 {
            return Err(Error::Incomplete);
        }

        let mut encoded = buffer.take(len.0 as usize);

        while encoded.has_remaining() {
            match Property::decode(&mut encoded)? {
                Property::ReasonString(v) => properties.reason_string = Some(v),
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
