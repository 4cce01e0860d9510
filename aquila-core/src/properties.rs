//! MQTT 5.0 properties.
//!
//! Each property is a newtype over its wire value and encodes as its
//! one-byte identifier followed by the value. [`Property`] is the decoding
//! side: it reads an identifier and produces the matching typed value.

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::string::String;

use crate::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

macro_rules! property {
    ($(#[$meta:meta])* $name:ident($ty:ty) = $id:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub $ty);

        impl $name {
            pub fn new(value: $ty) -> Self {
                $name(value)
            }
        }

        impl Encoder for $name {
            fn encode(&self, buffer: &mut BytesMut) {
                buffer.put_u8($id);
                self.0.encode(buffer);
            }

            fn encoded_size(&self) -> usize {
                1 + self.0.encoded_size()
            }
        }
    };
}

property!(PayloadFormatIndicator(u8) = 0x01);
property!(MessageExpiryInterval(u32) = 0x02);
property!(ContentType(String) = 0x03);
property!(ResponseTopic(String) = 0x08);
property!(CorrelationData(Bytes) = 0x09);
property!(SubscriptionIdentifier(VariableByteInteger) = 0x0b);
property!(SessionExpiryInterval(u32) = 0x11);
property!(AssignedClientIdentifier(String) = 0x12);
property!(ServerKeepAlive(u16) = 0x13);
property!(AuthenticationMethod(String) = 0x15);
property!(AuthenticationData(Bytes) = 0x16);
property!(RequestProblemInformation(u8) = 0x17);
property!(WillDelayInterval(u32) = 0x18);
property!(RequestResponseInformation(u8) = 0x19);
property!(ResponseInformation(String) = 0x1a);
property!(ServerReference(String) = 0x1c);
property!(ReasonString(String) = 0x1f);
property!(ReceiveMaximum(u16) = 0x21);
property!(TopicAliasMaximum(u16) = 0x22);
property!(TopicAlias(u16) = 0x23);
property!(MaximumQoS(u8) = 0x24);
property!(RetainAvailable(bool) = 0x25);
property!(MaximumPacketSize(u32) = 0x27);
property!(WildcardSubscriptionAvailable(bool) = 0x28);
property!(SubscriptionIdentifierAvailable(bool) = 0x29);
property!(SharedSubscriptionAvailable(bool) = 0x2a);

/// User property: a free-form UTF-8 key/value pair (identifier 0x26).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProperty {
    pub key: String,
    pub value: String,
}

impl UserProperty {
    pub fn new(key: String, value: String) -> Self {
        UserProperty { key, value }
    }
}

impl Encoder for UserProperty {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(0x26);
        self.key.encode(buffer);
        self.value.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        1 + self.key.encoded_size() + self.value.encoded_size()
    }
}

/// A decoded property, tagged by its wire identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    PayloadFormatIndicator(PayloadFormatIndicator),
    MessageExpiryInterval(MessageExpiryInterval),
    ContentType(ContentType),
    ResponseTopic(ResponseTopic),
    CorrelationData(CorrelationData),
    SubscriptionIdentifier(SubscriptionIdentifier),
    SessionExpiryInterval(SessionExpiryInterval),
    AssignedClientIdentifier(AssignedClientIdentifier),
    ServerKeepAlive(ServerKeepAlive),
    AuthenticationMethod(AuthenticationMethod),
    AuthenticationData(AuthenticationData),
    RequestProblemInformation(RequestProblemInformation),
    WillDelayInterval(WillDelayInterval),
    RequestResponseInformation(RequestResponseInformation),
    ResponseInformation(ResponseInformation),
    ServerReference(ServerReference),
    ReasonString(ReasonString),
    ReceiveMaximum(ReceiveMaximum),
    TopicAliasMaximum(TopicAliasMaximum),
    TopicAlias(TopicAlias),
    MaximumQoS(MaximumQoS),
    RetainAvailable(RetainAvailable),
    UserProperty(UserProperty),
    MaximumPacketSize(MaximumPacketSize),
    WildcardSubscriptionAvailable(WildcardSubscriptionAvailable),
    SubscriptionIdentifierAvailable(SubscriptionIdentifierAvailable),
    SharedSubscriptionAvailable(SharedSubscriptionAvailable),
}

impl Decoder for Property {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let id = u8::decode(buffer)?;

        let property = match id {
            0x01 => Property::PayloadFormatIndicator(PayloadFormatIndicator(u8::decode(buffer)?)),
            0x02 => Property::MessageExpiryInterval(MessageExpiryInterval(u32::decode(buffer)?)),
            0x03 => Property::ContentType(ContentType(String::decode(buffer)?)),
            0x08 => Property::ResponseTopic(ResponseTopic(String::decode(buffer)?)),
            0x09 => Property::CorrelationData(CorrelationData(Bytes::decode(buffer)?)),
            0x0b => Property::SubscriptionIdentifier(SubscriptionIdentifier(
                VariableByteInteger::decode(buffer)?,
            )),
            0x11 => Property::SessionExpiryInterval(SessionExpiryInterval(u32::decode(buffer)?)),
            0x12 => Property::AssignedClientIdentifier(AssignedClientIdentifier(String::decode(
                buffer,
            )?)),
            0x13 => Property::ServerKeepAlive(ServerKeepAlive(u16::decode(buffer)?)),
            0x15 => Property::AuthenticationMethod(AuthenticationMethod(String::decode(buffer)?)),
            0x16 => Property::AuthenticationData(AuthenticationData(Bytes::decode(buffer)?)),
            0x17 => Property::RequestProblemInformation(RequestProblemInformation(u8::decode(
                buffer,
            )?)),
            0x18 => Property::WillDelayInterval(WillDelayInterval(u32::decode(buffer)?)),
            0x19 => Property::RequestResponseInformation(RequestResponseInformation(u8::decode(
                buffer,
            )?)),
            0x1a => Property::ResponseInformation(ResponseInformation(String::decode(buffer)?)),
            0x1c => Property::ServerReference(ServerReference(String::decode(buffer)?)),
            0x1f => Property::ReasonString(ReasonString(String::decode(buffer)?)),
            0x21 => Property::ReceiveMaximum(ReceiveMaximum(u16::decode(buffer)?)),
            0x22 => Property::TopicAliasMaximum(TopicAliasMaximum(u16::decode(buffer)?)),
            0x23 => Property::TopicAlias(TopicAlias(u16::decode(buffer)?)),
            0x24 => Property::MaximumQoS(MaximumQoS(u8::decode(buffer)?)),
            0x25 => Property::RetainAvailable(RetainAvailable(bool::decode(buffer)?)),
            0x26 => Property::UserProperty(UserProperty {
                key: String::decode(buffer)?,
                value: String::decode(buffer)?,
            }),
            0x27 => Property::MaximumPacketSize(MaximumPacketSize(u32::decode(buffer)?)),
            0x28 => Property::WildcardSubscriptionAvailable(WildcardSubscriptionAvailable(
                bool::decode(buffer)?,
            )),
            0x29 => Property::SubscriptionIdentifierAvailable(SubscriptionIdentifierAvailable(
                bool::decode(buffer)?,
            )),
            0x2a => Property::SharedSubscriptionAvailable(SharedSubscriptionAvailable(
                bool::decode(buffer)?,
            )),
            _ => return Err(ReasonCode::MalformedPacket.into()),
        };

        Ok(property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_round_trip() {
        let mut buffer = BytesMut::new();
        MessageExpiryInterval::new(30).encode(&mut buffer);
        assert_eq!(&buffer[..], &[0x02, 0x00, 0x00, 0x00, 0x1e]);

        match Property::decode(&mut buffer).unwrap() {
            Property::MessageExpiryInterval(v) => assert_eq!(v.0, 30),
            other => panic!("unexpected property: {:?}", other),
        }
    }

    #[test]
    fn user_property_round_trip() {
        let mut buffer = BytesMut::new();
        UserProperty::new("key".into(), "value".into()).encode(&mut buffer);

        match Property::decode(&mut buffer).unwrap() {
            Property::UserProperty(v) => {
                assert_eq!(v.key, "key");
                assert_eq!(v.value, "value");
            }
            other => panic!("unexpected property: {:?}", other),
        }
    }

    #[test]
    fn unknown_identifier_is_malformed() {
        let mut buffer = Bytes::from_static(&[0x7e, 0x00]);
        assert!(Property::decode(&mut buffer).is_err());
    }
}
