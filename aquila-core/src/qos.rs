//! MQTT Quality of Service levels.

use core::fmt;

/// Delivery guarantee requested for a message.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum QoS {
    /// At most once delivery (fire and forget).
    #[default]
    AtMostOnce = 0,
    /// At least once delivery (acknowledged with PUBACK).
    AtLeastOnce = 1,
    /// Exactly once delivery (PUBREC/PUBREL/PUBCOMP handshake).
    ExactlyOnce = 2,
    /// Reserved bit pattern; never valid on the wire.
    Invalid = 0xff,
}

impl From<u8> for QoS {
    fn from(value: u8) -> Self {
        match value {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::Invalid,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QoS::AtMostOnce => write!(f, "QoS 0"),
            QoS::AtLeastOnce => write!(f, "QoS 1"),
            QoS::ExactlyOnce => write!(f, "QoS 2"),
            QoS::Invalid => write!(f, "invalid QoS"),
        }
    }
}
