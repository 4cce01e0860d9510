use core::mem;

use bytes::{Buf, BufMut, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    properties::*,
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnAckFlags {
    pub session_present: bool,
}

impl Encoder for ConnAckFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.session_present as u8);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u8>()
    }
}

impl Decoder for ConnAckFlags {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let byte = u8::decode(buffer)?;

        if (byte & 0b1111_1110) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(ConnAckFlags {
            session_present: (byte & 0b0000_0001) != 0,
        })
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnAckProperties {
    pub session_expiry_interval: Option<SessionExpiryInterval>,
    pub receive_maximum: Option<ReceiveMaximum>,
    pub maximum_qos: Option<MaximumQoS>,
    pub retain_available: Option<RetainAvailable>,
    pub maximum_packet_size: Option<MaximumPacketSize>,
    pub assigned_client_id: Option<AssignedClientIdentifier>,
    pub topic_alias_maximum: Option<TopicAliasMaximum>,
    pub reason_string: Option<ReasonString>,
    pub user_property: Option<Vec<UserProperty>>,
    pub wildcard_subscription_available: Option<WildcardSubscriptionAvailable>,
    pub subscription_identifier_available: Option<SubscriptionIdentifierAvailable>,
    pub shared_subscription_available: Option<SharedSubscriptionAvailable>,
    pub server_keepalive: Option<ServerKeepAlive>,
    pub response_information: Option<ResponseInformation>,
    pub server_reference: Option<ServerReference>,
    pub authentication_method: Option<AuthenticationMethod>,
    pub authentication_data: Option<AuthenticationData>,
}

impl Encoder for ConnAckProperties {
    fn encode(&self, buffer: &mut BytesMut) {
        self.session_expiry_interval.encode(buffer);
        self.receive_maximum.encode(buffer);
        self.maximum_qos.encode(buffer);
        self.retain_available.encode(buffer);
        self.maximum_packet_size.encode(buffer);
        self.assigned_client_id.encode(buffer);
        self.topic_alias_maximum.encode(buffer);
        self.reason_string.encode(buffer);
        self.user_property.encode(buffer);
        self.wildcard_subscription_available.encode(buffer);
        self.subscription_identifier_available.encode(buffer);
        self.shared_subscription_available.encode(buffer);
        self.server_keepalive.encode(buffer);
        self.response_information.encode(buffer);
        self.server_reference.encode(buffer);
        self.authentication_method.encode(buffer);
        self.authentication_data.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.session_expiry_interval.encoded_size()
            + self.receive_maximum.encoded_size()
            + self.maximum_qos.encoded_size()
            + self.retain_available.encoded_size()
            + self.maximum_packet_size.encoded_size()
            + self.assigned_client_id.encoded_size()
            + self.topic_alias_maximum.encoded_size()
            + self.reason_string.encoded_size()
            + self.user_property.encoded_size()
            + self.wildcard_subscription_available.encoded_size()
            + self.subscription_identifier_available.encoded_size()
            + self.shared_subscription_available.encoded_size()
            + self.server_keepalive.encoded_size()
            + self.response_information.encoded_size()
            + self.server_reference.encoded_size()
            + self.authentication_method.encoded_size()
            + self.authentication_data.encoded_size()
    }
}

impl Decoder for ConnAckProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = ConnAckProperties::default();

        if len.0 == 0 {
            return Ok(properties);
        } else if (buffer.remaining() as u32) < len.0 {
            return Err(Error::Incomplete);
        }

        let mut encoded = buffer.take(len.0 as usize);

        while encoded.has_remaining() {
            match Property::decode(&mut encoded)? {
                Property::SessionExpiryInterval(v) => properties.session_expiry_interval = Some(v),
                Property::ReceiveMaximum(v) => properties.receive_maximum = Some(v),
                Property::MaximumQoS(v) => properties.maximum_qos = Some(v),
                Property::RetainAvailable(v) => properties.retain_available = Some(v),
                Property::MaximumPacketSize(v) => properties.maximum_packet_size = Some(v),
                Property::AssignedClientIdentifier(v) => properties.assigned_client_id = Some(v),
                Property::TopicAliasMaximum(v) => properties.topic_alias_maximum = Some(v),
                Property::ReasonString(v) => properties.reason_string = Some(v),
                Property::UserProperty(v) => {
                    if let Some(vec) = &mut properties.user_property {
                        vec.push(v);
                    } else {
                        properties.user_property = Some(vec![v]);
                    }
                }
                Property::WildcardSubscriptionAvailable(v) => {
                    properties.wildcard_subscription_available = Some(v)
                }
                Property::SubscriptionIdentifierAvailable(v) => {
                    properties.subscription_identifier_available = Some(v)
                }
                Property::SharedSubscriptionAvailable(v) => {
                    properties.shared_subscription_available = Some(v)
                }
                Property::ServerKeepAlive(v) => properties.server_keepalive = Some(v),
                Property::ResponseInformation(v) => properties.response_information = Some(v),
                Property::ServerReference(v) => properties.server_reference = Some(v),
                Property::AuthenticationMethod(v) => properties.authentication_method = Some(v),
                Property::AuthenticationData(v) => properties.authentication_data = Some(v),
                _ => return Err(ReasonCode::MalformedPacket.into()),
            }
        }

        Ok(properties)
    }
}

/// CONNACK, the broker's answer to CONNECT.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnAckPacket {
    pub flags: ConnAckFlags,
    pub reason_code: ReasonCode,
    pub properties: Option<ConnAckProperties>,
}

const PACKET_TYPE: u8 = 0x02;

impl Encoder for ConnAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        let props_len = self.properties.encoded_size();
        let remaining_len = self.flags.encoded_size()
            + self.reason_code.encoded_size()
            + VariableByteInteger(props_len as u32).encoded_size()
            + props_len;

        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.flags.encode(buffer);
        self.reason_code.encode(buffer);
        VariableByteInteger(props_len as u32).encode(buffer);
        self.properties.encode(buffer);
    }
}

impl Decoder for ConnAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining = VariableByteInteger::decode(buffer)?;

        let flags = ConnAckFlags::decode(buffer)?;
        let reason_code = ReasonCode::decode(buffer)?;
        let properties = Some(ConnAckProperties::decode(buffer)?);

        Ok(ConnAckPacket {
            flags,
            reason_code,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connack_with_assigned_id_round_trip() {
        let expected = vec![
            0x20, 0x0b, 0x00, 0x00, 0x08, 0x24, 0x02, 0x12, 0x00, 0x03, b'a', b'b', b'c',
        ];

        let packet = ConnAckPacket {
            flags: ConnAckFlags {
                session_present: false,
            },
            reason_code: ReasonCode::Success,
            properties: Some(ConnAckProperties {
                maximum_qos: Some(MaximumQoS::new(2)),
                assigned_client_id: Some(AssignedClientIdentifier::new("abc".into())),
                ..Default::default()
            }),
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let decoded = ConnAckPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn connack_not_authorized() {
        let packet = ConnAckPacket {
            flags: ConnAckFlags {
                session_present: false,
            },
            reason_code: ReasonCode::NotAuthorized,
            properties: Some(ConnAckProperties::default()),
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0x20, 0x03, 0x00, 0x87, 0x00]);
    }
}
