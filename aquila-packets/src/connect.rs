use core::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    properties::*,
    qos::QoS,
    reason::ReasonCode,
};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 5;

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnectFlags {
    pub user_name: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will_flag: bool,
    pub clean_start: bool,
}

impl Encoder for ConnectFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut flags: u8 = 0;

        if self.user_name {
            flags |= 0b1000_0000;
        }
        if self.password {
            flags |= 0b0100_0000;
        }
        if self.will_retain {
            flags |= 0b0010_0000;
        }
        if self.will_flag {
            flags |= 0b0000_0100;
            flags |= (self.will_qos as u8) << 3;
        }
        if self.clean_start {
            flags |= 0b0000_0010;
        }

        buffer.put_u8(flags);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u8>()
    }
}

impl Decoder for ConnectFlags {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let byte = u8::decode(buffer)?;

        // Bit 0 is reserved and must be zero.
        if (byte & 0b0000_0001) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let mut flags = ConnectFlags {
            user_name: (byte & 0b1000_0000) != 0,
            password: (byte & 0b0100_0000) != 0,
            will_retain: (byte & 0b0010_0000) != 0,
            clean_start: (byte & 0b0000_0010) != 0,
            ..Default::default()
        };

        if (byte & 0b0000_0100) != 0 {
            flags.will_flag = true;
            flags.will_qos = ((byte >> 3) & 0b0000_0011).into();
        }

        if flags.will_qos == QoS::Invalid {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(flags)
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnectProperties {
    pub session_expiry_interval: Option<SessionExpiryInterval>,
    pub receive_maximum: Option<ReceiveMaximum>,
    pub maximum_packet_size: Option<MaximumPacketSize>,
    pub topic_alias_maximum: Option<TopicAliasMaximum>,
    pub request_response_information: Option<RequestResponseInformation>,
    pub request_problem_information: Option<RequestProblemInformation>,
    pub user_property: Option<Vec<UserProperty>>,
    pub authentication_method: Option<AuthenticationMethod>,
    pub authentication_data: Option<AuthenticationData>,
}

impl Encoder for ConnectProperties {
    fn encode(&self, buffer: &mut BytesMut) {
        self.session_expiry_interval.encode(buffer);
        self.receive_maximum.encode(buffer);
        self.maximum_packet_size.encode(buffer);
        self.topic_alias_maximum.encode(buffer);
        self.request_response_information.encode(buffer);
        self.request_problem_information.encode(buffer);
        self.user_property.encode(buffer);
        self.authentication_method.encode(buffer);
        self.authentication_data.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.session_expiry_interval.encoded_size()
            + self.receive_maximum.encoded_size()
            + self.maximum_packet_size.encoded_size()
            + self.topic_alias_maximum.encoded_size()
            + self.request_response_information.encoded_size()
            + self.request_problem_information.encoded_size()
            + self.user_property.encoded_size()
            + self.authentication_method.encoded_size()
            + self.authentication_data.encoded_size()
    }
}

impl Decoder for ConnectProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = ConnectProperties::default();

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
                Property::MaximumPacketSize(v) => properties.maximum_packet_size = Some(v),
                Property::TopicAliasMaximum(v) => properties.topic_alias_maximum = Some(v),
                Property::RequestResponseInformation(v) => {
                    properties.request_response_information = Some(v)
                }
                Property::RequestProblemInformation(v) => {
                    properties.request_problem_information = Some(v)
                }
                Property::UserProperty(v) => {
                    if let Some(vec) = &mut properties.user_property {
                        vec.push(v);
                    } else {
                        properties.user_property = Some(vec![v]);
                    }
                }
                Property::AuthenticationMethod(v) => properties.authentication_method = Some(v),
                Property::AuthenticationData(v) => properties.authentication_data = Some(v),
                _ => return Err(ReasonCode::MalformedPacket.into()),
            }
        }

        Ok(properties)
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct WillProperties {
    pub will_delay_interval: Option<WillDelayInterval>,
    pub payload_format_indicator: Option<PayloadFormatIndicator>,
    pub message_expiry_interval: Option<MessageExpiryInterval>,
    pub content_type: Option<ContentType>,
    pub response_topic: Option<ResponseTopic>,
    pub correlation_data: Option<CorrelationData>,
    pub user_property: Option<Vec<UserProperty>>,
}

impl Encoder for WillProperties {
    fn encode(&self, buffer: &mut BytesMut) {
        self.will_delay_interval.encode(buffer);
        self.payload_format_indicator.encode(buffer);
        self.message_expiry_interval.encode(buffer);
        self.content_type.encode(buffer);
        self.response_topic.encode(buffer);
        self.correlation_data.encode(buffer);
        self.user_property.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.will_delay_interval.encoded_size()
            + self.payload_format_indicator.encoded_size()
            + self.message_expiry_interval.encoded_size()
            + self.content_type.encoded_size()
            + self.response_topic.encoded_size()
            + self.correlation_data.encoded_size()
            + self.user_property.encoded_size()
    }
}

impl Decoder for WillProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = WillProperties::default();

        if len.0 == 0 {
            return Ok(properties);
        } else if (buffer.remaining() as u32) < len.0 {
            return Err(Error::Incomplete);
        }

        let mut encoded = buffer.take(len.0 as usize);

        while encoded.has_remaining() {
            match Property::decode(&mut encoded)? {
                Property::WillDelayInterval(v) => properties.will_delay_interval = Some(v),
                Property::PayloadFormatIndicator(v) => {
                    properties.payload_format_indicator = Some(v)
                }
                Property::MessageExpiryInterval(v) => properties.message_expiry_interval = Some(v),
                Property::ContentType(v) => properties.content_type = Some(v),
                Property::ResponseTopic(v) => properties.response_topic = Some(v),
                Property::CorrelationData(v) => properties.correlation_data = Some(v),
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

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnectPayload {
    pub client_id: String,
    pub will_properties: Option<WillProperties>,
    pub will_topic: Option<String>,
    pub will_payload: Option<Bytes>,
    pub user_name: Option<String>,
    pub password: Option<Bytes>,
}

impl ConnectPayload {
    fn encode_with(&self, buffer: &mut BytesMut, flags: &ConnectFlags) {
        self.client_id.encode(buffer);

        if flags.will_flag {
            VariableByteInteger(self.will_properties.encoded_size() as u32).encode(buffer);
            self.will_properties.encode(buffer);
            self.will_topic.encode(buffer);
            self.will_payload.encode(buffer);
        }

        if flags.user_name {
            self.user_name.encode(buffer);
        }
        if flags.password {
            self.password.encode(buffer);
        }
    }

    fn encoded_size_with(&self, flags: &ConnectFlags) -> usize {
        let mut len = self.client_id.encoded_size();

        if flags.will_flag {
            len += VariableByteInteger(self.will_properties.encoded_size() as u32).encoded_size();
            len += self.will_properties.encoded_size();
            len += self.will_topic.encoded_size();
            len += self.will_payload.encoded_size();
        }

        if flags.user_name {
            len += self.user_name.encoded_size();
        }
        if flags.password {
            len += self.password.encoded_size();
        }

        len
    }
}

/// CONNECT, the first packet a client sends on a fresh stream.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnectPacket {
    pub flags: ConnectFlags,
    pub keepalive: u16,
    pub properties: Option<ConnectProperties>,
    pub payload: ConnectPayload,
}

const PACKET_TYPE: u8 = 0x01;

impl Encoder for ConnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        let props_len = self.properties.encoded_size();
        let mut remaining_len = PROTOCOL_NAME.encoded_size() + 1;
        remaining_len += self.flags.encoded_size();
        remaining_len += self.keepalive.encoded_size();
        remaining_len += VariableByteInteger(props_len as u32).encoded_size() + props_len;
        remaining_len += self.payload.encoded_size_with(&self.flags);

        VariableByteInteger(remaining_len as u32).encode(buffer);

        PROTOCOL_NAME.encode(buffer);
        buffer.put_u8(PROTOCOL_LEVEL);
        self.flags.encode(buffer);
        self.keepalive.encode(buffer);
        VariableByteInteger(props_len as u32).encode(buffer);
        self.properties.encode(buffer);
        self.payload.encode_with(buffer, &self.flags);
    }
}

impl Decoder for ConnectPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining = VariableByteInteger::decode(buffer)?;

        let protocol_name = String::decode(buffer)?;
        let protocol_level = u8::decode(buffer)?;
        if protocol_name != PROTOCOL_NAME || protocol_level != PROTOCOL_LEVEL {
            return Err(ReasonCode::UnsupportedProtocolVersion.into());
        }

        let flags = ConnectFlags::decode(buffer)?;
        let keepalive = u16::decode(buffer)?;
        let properties = Some(ConnectProperties::decode(buffer)?);

        let mut payload = ConnectPayload {
            client_id: String::decode(buffer)?,
            ..Default::default()
        };

        if flags.will_flag {
            payload.will_properties = Some(WillProperties::decode(buffer)?);
            payload.will_topic = Some(String::decode(buffer)?);
            payload.will_payload = Some(Bytes::decode(buffer)?);
        }

        if flags.user_name {
            payload.user_name = Some(String::decode(buffer)?);
        }
        if flags.password {
            payload.password = Some(Bytes::decode(buffer)?);
        }

        Ok(ConnectPacket {
            flags,
            keepalive,
            properties,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_connect_round_trip() {
        let expected = vec![
            0x10, 0x11, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 0x3c, 0x00, 0x00,
            0x04, b'a', b'b', b'c', b'd',
        ];

        let packet = ConnectPacket {
            flags: ConnectFlags {
                clean_start: true,
                ..Default::default()
            },
            keepalive: 60,
            properties: Some(ConnectProperties::default()),
            payload: ConnectPayload {
                client_id: "abcd".into(),
                ..Default::default()
            },
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let decoded = ConnectPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn connect_with_credentials_round_trip() {
        let packet = ConnectPacket {
            flags: ConnectFlags {
                clean_start: true,
                user_name: true,
                password: true,
                ..Default::default()
            },
            keepalive: 30,
            properties: Some(ConnectProperties::default()),
            payload: ConnectPayload {
                client_id: "abcd".into(),
                user_name: Some("admin".into()),
                password: Some(Bytes::from_static(b"secret")),
                ..Default::default()
            },
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        let decoded = ConnectPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn wrong_protocol_level_is_rejected() {
        let mut encoded = BytesMut::new();
        encoded.extend_from_slice(&[
            0x10, 0x0d, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3c, 0x00, 0x00,
            0x00,
        ]);

        assert!(ConnectPacket::decode(&mut encoded).is_err());
    }
}
