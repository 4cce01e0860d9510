use bytes::{Buf, BufMut, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    properties::{Property, ReasonString, ServerReference, SessionExpiryInterval, UserProperty},
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct DisconnectProperties {
    pub session_expiry_interval: Option<SessionExpiryInterval>,
    pub reason_string: Option<ReasonString>,
    pub user_property: Option<Vec<UserProperty>>,
    pub server_reference: Option<ServerReference>,
}

impl Encoder for DisconnectProperties {
    fn encode(&self, buffer: &mut BytesMut) {
        self.session_expiry_interval.encode(buffer);
        self.reason_string.encode(buffer);
        self.user_property.encode(buffer);
        self.server_reference.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.session_expiry_interval.encoded_size()
            + self.reason_string.encoded_size()
            + self.user_property.encoded_size()
            + self.server_reference.encoded_size()
    }
}

impl Decoder for DisconnectProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = DisconnectProperties::default();

        if len.0 == 0 {
            return Ok(properties);
        } else if (buffer.remaining() as u32) < len.0 {
            return Err(Error::Incomplete);
        }

        let mut encoded = buffer.take(len.0 as usize);

        while encoded.has_remaining() {
            match Property::decode(&mut encoded)? {
                Property::SessionExpiryInterval(v) => properties.session_expiry_interval = Some(v),
                Property::ReasonString(v) => properties.reason_string = Some(v),
                Property::UserProperty(v) => {
                    if let Some(vec) = &mut properties.user_property {
                        vec.push(v);
                    } else {
                        properties.user_property = Some(vec![v]);
                    }
                }
                Property::ServerReference(v) => properties.server_reference = Some(v),
                _ => return Err(ReasonCode::MalformedPacket.into()),
            }
        }

        Ok(properties)
    }
}

/// DISCONNECT, the clean way to end a connection from either side.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DisconnectPacket {
    pub reason_code: ReasonCode,
    pub properties: Option<DisconnectProperties>,
}

impl Default for DisconnectPacket {
    fn default() -> Self {
        DisconnectPacket {
            reason_code: ReasonCode::NormalDisconnection,
            properties: None,
        }
    }
}

const PACKET_TYPE: u8 = 0x0e;

impl Encoder for DisconnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        // A normal disconnection with no properties is just the fixed header.
        if self.reason_code == ReasonCode::NormalDisconnection && self.properties.is_none() {
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

impl Decoder for DisconnectPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let remaining = VariableByteInteger::decode(buffer)?;

        if remaining.0 == 0 {
            return Ok(DisconnectPacket::default());
        }

        let reason_code = ReasonCode::decode(buffer)?;
        let properties = if remaining.0 >= 2 {
            Some(DisconnectProperties::decode(buffer)?)
        } else {
            None
        };

        Ok(DisconnectPacket {
            reason_code,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_disconnect_is_two_bytes() {
        let packet = DisconnectPacket::default();

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0xe0, 0x00]);

        let decoded = DisconnectPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn disconnect_with_reason_round_trip() {
        let packet = DisconnectPacket {
            reason_code: ReasonCode::ServerShuttingDown,
            properties: Some(DisconnectProperties::default()),
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0xe0, 0x02, 0x8b, 0x00]);

        let decoded = DisconnectPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }
}
