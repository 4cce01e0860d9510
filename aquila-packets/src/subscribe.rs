use bytes::{Buf, BufMut, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use aquila_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    properties::{Property, SubscriptionIdentifier, UserProperty},
    qos::QoS,
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct SubscribeProperties {
    pub subscription_id: Option<SubscriptionIdentifier>,
    pub user_property: Option<Vec<UserProperty>>,
}

impl Encoder for SubscribeProperties {
    fn encode(&self, buffer: &mut BytesMut) {
        self.subscription_id.encode(buffer);
        self.user_property.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.subscription_id.encoded_size() + self.user_property.encoded_size()
    }
}

impl Decoder for SubscribeProperties {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let len = VariableByteInteger::decode(buffer)?;
        let mut properties = SubscribeProperties::default();

        if len.0 == 0 {
            return Ok(properties);
        } else if (buffer.remaining() as u32) < len.0 {
            return Err(Error::Incomplete);
        }

        let mut encoded = buffer.take(len.0 as usize);

        while encoded.has_remaining() {
            match Property::decode(&mut encoded)? {
                Property::SubscriptionIdentifier(v) => properties.subscription_id = Some(v),
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

/// Retained-message replay behavior requested with a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RetainHandling {
    #[default]
    SendRetained = 0x00,
    SendRetainedIfNonExisting = 0x01,
    DoNotSendRetained = 0x02,
    Invalid = 0xff,
}

impl From<u8> for RetainHandling {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::SendRetained,
            0x01 => Self::SendRetainedIfNonExisting,
            0x02 => Self::DoNotSendRetained,
            _ => Self::Invalid,
        }
    }
}

/// Per-filter options from the SUBSCRIBE payload.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl Encoder for SubscriptionOptions {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut encoded: u8 = self.qos as u8;

        if self.no_local {
            encoded |= 0b0000_0100;
        }
        if self.retain_as_published {
            encoded |= 0b0000_1000;
        }
        encoded |= (self.retain_handling as u8) << 4;

        buffer.put_u8(encoded);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl Decoder for SubscriptionOptions {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let encoded = u8::decode(buffer)?;

        let qos: QoS = (encoded & 0b0000_0011).into();
        if qos == QoS::Invalid {
            return Err(ReasonCode::ProtocolError.into());
        }

        let retain_handling: RetainHandling = (encoded >> 4).into();
        if retain_handling == RetainHandling::Invalid {
            return Err(ReasonCode::ProtocolError.into());
        }

        Ok(SubscriptionOptions {
            qos,
            no_local: (encoded & 0b0000_0100) != 0,
            retain_as_published: (encoded & 0b0000_1000) != 0,
            retain_handling,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubscribePayload {
    pub topic_filter: String,
    pub options: SubscriptionOptions,
}

impl Encoder for SubscribePayload {
    fn encode(&self, buffer: &mut BytesMut) {
        self.topic_filter.encode(buffer);
        self.options.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.topic_filter.encoded_size() + self.options.encoded_size()
    }
}

impl Decoder for SubscribePayload {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        Ok(SubscribePayload {
            topic_filter: String::decode(buffer)?,
            options: SubscriptionOptions::decode(buffer)?,
        })
    }
}

/// SUBSCRIBE, a batch of topic-filter subscription requests.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub properties: Option<SubscribeProperties>,
    pub payload: Vec<SubscribePayload>,
}

const PACKET_TYPE: u8 = 0x08;

impl Encoder for SubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        // SUBSCRIBE carries mandatory flag bits 0b0010 in the fixed header.
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

impl Decoder for SubscribePacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining = VariableByteInteger::decode(buffer)?;

        let packet_id = u16::decode(buffer)?;
        let properties = Some(SubscribeProperties::decode(buffer)?);

        if !buffer.has_remaining() {
            // A SUBSCRIBE with no filters is a protocol error.
            return Err(ReasonCode::ProtocolError.into());
        }

        let mut payload = Vec::new();
        while buffer.has_remaining() {
            payload.push(SubscribePayload::decode(buffer)?);
        }

        Ok(SubscribePacket {
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
    fn subscribe_round_trip() {
        let expected = vec![
            0x82, 0x09, 0x00, 0x01, 0x00, 0x00, 0x03, b'f', b'o', b'o', 0x01,
        ];

        let packet = SubscribePacket {
            packet_id: 1,
            properties: Some(SubscribeProperties::default()),
            payload: vec![SubscribePayload {
                topic_filter: "foo".into(),
                options: SubscriptionOptions {
                    qos: QoS::AtLeastOnce,
                    ..Default::default()
                },
            }],
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let decoded = SubscribePacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn subscribe_with_multiple_filters() {
        let packet = SubscribePacket {
            packet_id: 3,
            properties: Some(SubscribeProperties::default()),
            payload: vec![
                SubscribePayload {
                    topic_filter: "a/b".into(),
                    options: SubscriptionOptions::default(),
                },
                SubscribePayload {
                    topic_filter: "$share/g/foo".into(),
                    options: SubscriptionOptions {
                        qos: QoS::ExactlyOnce,
                        ..Default::default()
                    },
                },
            ],
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        let decoded = SubscribePacket::decode(&mut encoded).unwrap();
        assert_eq!(decoded.payload.len(), 2);
        assert_eq!(decoded, packet);
    }
}
