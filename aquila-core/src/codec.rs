//! Wire-format primitives shared by every control packet.

use core::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::{error::Error, reason::ReasonCode};

/// Largest value representable by a four-byte variable byte integer.
pub const VAR_BYTE_INT_MAX: u32 = 268_435_455;

pub trait Encoder {
    fn encode(&self, buffer: &mut BytesMut);

    fn encoded_size(&self) -> usize {
        mem::size_of_val(self)
    }
}

pub trait Decoder {
    fn decode<T>(buffer: &mut T) -> crate::Result<Self>
    where
        Self: Sized,
        T: Buf;
}

/// MQTT variable byte integer (1-4 bytes, 7 bits of payload per byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariableByteInteger(pub u32);

impl Encoder for VariableByteInteger {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut value = self.0;

        loop {
            let mut byte = (value % 128) as u8;
            value /= 128;

            if value > 0 {
                byte |= 0b1000_0000;
            }

            buffer.put_u8(byte);

            if value == 0 {
                break;
            }
        }
    }

    fn encoded_size(&self) -> usize {
        match self.0 {
            0..=127 => 1,
            128..=16_383 => 2,
            16_384..=2_097_151 => 3,
            _ => 4,
        }
    }
}

impl Decoder for VariableByteInteger {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let mut multiplier: u32 = 1;
        let mut value: u32 = 0;

        loop {
            if !buffer.has_remaining() {
                return Err(Error::Incomplete);
            }

            let byte = buffer.get_u8();
            value += (byte & 0b0111_1111) as u32 * multiplier;

            if (byte & 0b1000_0000) == 0 {
                return Ok(VariableByteInteger(value));
            }

            multiplier *= 128;
            if multiplier > 128 * 128 * 128 {
                return Err(ReasonCode::MalformedPacket.into());
            }
        }
    }
}

impl Encoder for u8 {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(*self);
    }
}

impl Decoder for u8 {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if !buffer.has_remaining() {
            return Err(Error::Incomplete);
        }

        Ok(buffer.get_u8())
    }
}

impl Encoder for u16 {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u16(*self);
    }
}

impl Decoder for u16 {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 2 {
            return Err(Error::Incomplete);
        }

        Ok(buffer.get_u16())
    }
}

impl Encoder for u32 {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u32(*self);
    }
}

impl Decoder for u32 {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 4 {
            return Err(Error::Incomplete);
        }

        Ok(buffer.get_u32())
    }
}

impl Encoder for bool {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(*self as u8);
    }
}

impl Decoder for bool {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        Ok(u8::decode(buffer)? != 0)
    }
}

impl Encoder for String {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.len() as u16);
        buffer.put(self.as_bytes());
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u16>() + self.len()
    }
}

impl Decoder for String {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 2 {
            return Err(Error::Incomplete);
        }

        let length = buffer.get_u16() as usize;
        if buffer.remaining() < length {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let bytes = buffer.copy_to_bytes(length);
        String::from_utf8(bytes.to_vec()).map_err(|_| ReasonCode::MalformedPacket.into())
    }
}

impl Encoder for &str {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.len() as u16);
        buffer.put(self.as_bytes());
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u16>() + self.len()
    }
}

impl Encoder for Bytes {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.len() as u16);
        buffer.extend(self);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u16>() + self.len()
    }
}

impl Decoder for Bytes {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 2 {
            return Err(Error::Incomplete);
        }

        let length = buffer.get_u16() as usize;
        if buffer.remaining() < length {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(buffer.copy_to_bytes(length))
    }
}

impl<T: Encoder> Encoder for Option<T> {
    fn encode(&self, buffer: &mut BytesMut) {
        if let Some(value) = self {
            value.encode(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        self.as_ref().map_or(0, Encoder::encoded_size)
    }
}

impl<T: Encoder> Encoder for Vec<T> {
    fn encode(&self, buffer: &mut BytesMut) {
        for value in self {
            value.encode(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        self.iter().map(Encoder::encoded_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_byte_integer_round_trip() {
        let mut encoded = BytesMut::new();
        VariableByteInteger(325).encode(&mut encoded);
        assert_eq!(&encoded[..], &[0xc5, 0x02]);

        let decoded = VariableByteInteger::decode(&mut encoded).unwrap();
        assert_eq!(decoded.0, 325);
    }

    #[test]
    fn var_byte_integer_sizes() {
        assert_eq!(VariableByteInteger(0).encoded_size(), 1);
        assert_eq!(VariableByteInteger(127).encoded_size(), 1);
        assert_eq!(VariableByteInteger(128).encoded_size(), 2);
        assert_eq!(VariableByteInteger(16_384).encoded_size(), 3);
        assert_eq!(VariableByteInteger(VAR_BYTE_INT_MAX).encoded_size(), 4);
    }

    #[test]
    fn var_byte_integer_overflow_is_malformed() {
        let mut encoded = Bytes::from_static(&[0xc5, 0xc5, 0xc5, 0xc5, 0x02]);

        match VariableByteInteger::decode(&mut encoded) {
            Err(Error::Protocol(code)) => assert_eq!(code, ReasonCode::MalformedPacket),
            other => panic!("expected malformed packet, got {:?}", other),
        }
    }

    #[test]
    fn string_decode_rejects_short_buffer() {
        let mut encoded = Bytes::from_static(&[0x00, 0x05, b'a', b'b']);

        assert!(String::decode(&mut encoded).is_err());
    }
}
