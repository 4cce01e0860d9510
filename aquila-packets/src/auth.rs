use bytes::{Buf, BufMut, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    properties::{
        AuthenticationData, AuthenticationMethod, Property, ReasonString, UserProperty,
    },
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct AuthProperties {
    pub authentication_method: Option<AuthenticationMethod>,
    pub authentication_data: Option<AuthenticationData>,
    pub reason_string: Option<ReasonString>,
    pub user_property: Option<Vec<UserProperty>>,
}

impl Encoder for AuthProperties {
    fn encode(&self, buffer: &mut BytesMut) {
        self.authentication_method.encode(buffer);
        self.authentication_data.encode(buffer);
        self.reason_string.encode(buffer);
        self.user_property.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.authentication_method.encoded_size()
            + self.authentication_data.encoded_size()
            + self.reason_string.encoded_size()
            + self.user_property.encoded_size()
    }
}

impl Decoder for AuthProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = AuthProperties::default();

        if len.0 == 0 {
            return Ok(properties);
        } else if (buffer.remaining() as u32) < len.0 {
            return Err(Error::Incomplete);
        }

        let mut encoded = buffer.take(len.0 as usize);

        while encoded.has_remaining() {
            match Property::decode(&mut encoded)? {
                Property::AuthenticationMethod(v) => properties.authentication_method = Some(v),
                Property::AuthenticationData(v) => properties.authentication_data = Some(v),
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

/// AUTH, the MQTT 5.0 extended-authentication exchange. The broker parses
/// these but does not currently act on them.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct AuthPacket {
    pub reason_code: ReasonCode,
    pub properties: Option<AuthProperties>,
}

const PACKET_TYPE: u8 = 0x0f;

impl Encoder for AuthPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        if self.reason_code == ReasonCode::Success && self.properties.is_none() {
            buffer.put_u8(0x00);
            return;
        }

        let props_len = self.properties.encoded_size();
        let remaining_len = self.reason_code.encoded_size()
            + VariableByteInteger(props_len as u32).encoded_size()
            + props_len;

        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.reason_code.encode(buffer);
        VariableByteInteger(props_len as u32).encode(buffer);
        self.properties.encode(buffer);
    }
}

impl Decoder for AuthPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let remaining = VariableByteInteger::decode(buffer)?;

        if remaining.0 == 0 {
            return Ok(AuthPacket::default());
        }

        let reason_code = ReasonCode::decode(buffer)?;
        let properties = if remaining.0 >= 2 {
            Some(AuthProperties::decode(buffer)?)
        } else {
            None
        };

        Ok(AuthPacket {
            reason_code,
            properties,
        })
    }
}
