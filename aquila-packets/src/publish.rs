use bytes::{Buf, Bytes, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    properties::*,
    qos::QoS,
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PublishProperties {
    pub payload_format_indicator: Option<PayloadFormatIndicator>,
    pub message_expiry_interval: Option<MessageExpiryInterval>,
    pub topic_alias: Option<TopicAlias>,
    pub response_topic: Option<ResponseTopic>,
    pub correlation_data: Option<CorrelationData>,
    pub user_property: Option<Vec<UserProperty>>,
    pub subscription_identifier: Option<SubscriptionIdentifier>,
    pub content_type: Option<ContentType>,
}

impl Encoder for PublishProperties {
    fn encode(&self, buffer: &mut BytesMut) {
        self.payload_format_indicator.encode(buffer);
        self.message_expiry_interval.encode(buffer);
        self.topic_alias.encode(buffer);
        self.response_topic.encode(buffer);
        self.correlation_data.encode(buffer);
        self.user_property.encode(buffer);
        self.subscription_identifier.encode(buffer);
        self.content_type.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.payload_format_indicator.encoded_size()
            + self.message_expiry_interval.encoded_size()
            + self.topic_alias.encoded_size()
            + self.response_topic.encoded_size()
            + self.correlation_data.encoded_size()
            + self.user_property.encoded_size()
            + self.subscription_identifier.encoded_size()
            + self.content_type.encoded_size()
    }
}

impl Decoder for PublishProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = PublishProperties::default();

        if len.0 == 0 {
            return Ok(properties);
        } else if (buffer.remaining() as u32) < len.0 {
            return Err(Error::Incomplete);
        }

        let mut encoded = buffer.take(len.0 as usize);

        while encoded.has_remaining() {
            match Property::decode(&mut encoded)? {
                Property::PayloadFormatIndicator(v) => {
                    properties.payload_format_indicator = Some(v)
                }
                Property::MessageExpiryInterval(v) => properties.message_expiry_interval = Some(v),
                Property::TopicAlias(v) => properties.topic_alias = Some(v),
                Property::ResponseTopic(v) => properties.response_topic = Some(v),
                Property::CorrelationData(v) => properties.correlation_data = Some(v),
                Property::UserProperty(v) => {
                    if let Some(vec) = &mut properties.user_property {
                        vec.push(v);
                    } else {
                        properties.user_property = Some(vec![v]);
                    }
                }
                Property::SubscriptionIdentifier(v) => {
                    properties.subscription_identifier = Some(v)
                }
                Property::ContentType(v) => properties.content_type = Some(v),
                _ => return Err(ReasonCode::MalformedPacket.into()),
            }
        }

        Ok(properties)
    }
}

/// PUBLISH, an application message travelling in either direction.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic_name: String,
    pub packet_id: Option<u16>,
    pub properties: Option<PublishProperties>,
    pub payload: Option<Bytes>,
}

const PACKET_TYPE: u8 = 0x03;

impl PublishPacket {
    /// Message-Expiry interval in seconds, when the publisher set one.
    pub fn message_expiry(&self) -> Option<u32> {
        self.properties
            .as_ref()
            .and_then(|p| p.message_expiry_interval.as_ref())
            .map(|v| v.0)
    }
}

impl Encoder for PublishPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut fixed_header = PACKET_TYPE << 4;
        fixed_header |= (self.dup as u8) << 3;
        fixed_header |= (self.qos as u8) << 1;
        fixed_header |= self.retain as u8;
        fixed_header.encode(buffer);

        let props_len = self.properties.encoded_size();
        let mut remaining_len = self.topic_name.encoded_size();
        remaining_len += self.packet_id.encoded_size();
        remaining_len += VariableByteInteger(props_len as u32).encoded_size() + props_len;
        remaining_len += self.payload.as_ref().map_or(0, Bytes::len);

        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.topic_name.encode(buffer);
        self.packet_id.encode(buffer);
        VariableByteInteger(props_len as u32).encode(buffer);
        self.properties.encode(buffer);

        // The payload is raw bytes with no length prefix; it runs to the
        // end of the packet.
        if let Some(payload) = &self.payload {
            buffer.extend(payload);
        }
    }
}

impl Decoder for PublishPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let fixed_header = u8::decode(buffer)?;
        let dup = (fixed_header & 0b0000_1000) != 0;
        let qos = QoS::from((fixed_header & 0b0000_0110) >> 1);
        let retain = (fixed_header & 0b0000_0001) != 0;

        if qos == QoS::Invalid {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let _remaining = VariableByteInteger::decode(buffer)?;

        let topic_name = String::decode(buffer)?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(u16::decode(buffer)?),
        };
        let properties = Some(PublishProperties::decode(buffer)?);

        let payload = if buffer.has_remaining() {
            Some(buffer.copy_to_bytes(buffer.remaining()))
        } else {
            None
        };

        Ok(PublishPacket {
            dup,
            qos,
            retain,
            topic_name,
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
    fn qos0_publish_round_trip() {
        let expected = vec![
            0x30, 0x0b, 0x00, 0x03, b'f', b'o', b'o', 0x00, b'H', b'e', b'l', b'l', b'o',
        ];

        let packet = PublishPacket {
            topic_name: "foo".into(),
            properties: Some(PublishProperties::default()),
            payload: Some(Bytes::from_static(b"Hello")),
            ..Default::default()
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let decoded = PublishPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn qos1_publish_carries_packet_id() {
        let packet = PublishPacket {
            qos: QoS::AtLeastOnce,
            topic_name: "foo".into(),
            packet_id: Some(7),
            properties: Some(PublishProperties::default()),
            payload: Some(Bytes::from_static(b"x")),
            ..Default::default()
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded[0], 0x32);

        let decoded = PublishPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded.packet_id, Some(7));
        assert_eq!(decoded, packet);
    }

    #[test]
    fn message_expiry_is_surfaced() {
        let packet = PublishPacket {
            topic_name: "foo".into(),
            properties: Some(PublishProperties {
                message_expiry_interval: Some(MessageExpiryInterval::new(120)),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(packet.message_expiry(), Some(120));

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        let decoded = PublishPacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded.message_expiry(), Some(120));
    }
}
