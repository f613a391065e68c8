// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary encoding primitives.
//!
//! All multi-byte integers are little-endian. Strings and byte strings are
//! prefixed with an `i32` length where `-1` denotes a null value; this crate
//! folds null into the empty value on decode, since nothing in the
//! connection-establishment layer distinguishes the two.
//!
//! `DateTime` values are 64-bit counts of 100-nanosecond ticks since
//! 1601-01-01 UTC (the Windows FILETIME epoch).

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

/// Maximum array length accepted while decoding.
///
/// A hostile peer can claim arbitrarily large arrays in a tiny message;
/// the cap bounds allocation before the element loop notices the buffer
/// is exhausted.
pub const MAX_ARRAY_LENGTH: usize = 0x0010_0000;

/// Seconds between the OPC UA epoch (1601-01-01) and the Unix epoch.
const EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

// =============================================================================
// EncodingError
// =============================================================================

/// Errors raised by the binary codec.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The decode buffer ended before the value was complete.
    #[error("Buffer exhausted: needed {needed} more bytes")]
    BufferExhausted {
        /// Number of missing bytes.
        needed: usize,
    },

    /// A length prefix was negative (other than the null sentinel) or
    /// exceeded [`MAX_ARRAY_LENGTH`].
    #[error("Invalid length prefix: {length}")]
    InvalidLength {
        /// The offending length value.
        length: i64,
    },

    /// A string field did not contain valid UTF-8.
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    /// An unknown structure type id was encountered where a known service
    /// message was expected.
    #[error("Unknown type id: ns={namespace}; i={identifier}")]
    UnknownTypeId {
        /// Namespace index of the type id.
        namespace: u16,
        /// Numeric identifier of the type id.
        identifier: u32,
    },

    /// A field held a value outside its wire-level domain.
    #[error("Invalid value {value} for field '{field}'")]
    InvalidValue {
        /// Name of the field being decoded.
        field: &'static str,
        /// The offending value.
        value: i64,
    },
}

/// Convenience alias for codec results.
pub type EncodingResult<T> = Result<T, EncodingError>;

fn need(buf: &impl Buf, bytes: usize) -> EncodingResult<()> {
    if buf.remaining() < bytes {
        Err(EncodingError::BufferExhausted {
            needed: bytes - buf.remaining(),
        })
    } else {
        Ok(())
    }
}

// =============================================================================
// Encode / Decode Traits
// =============================================================================

/// A value that can be written in OPC UA binary encoding.
pub trait BinaryEncodable {
    /// Appends the binary encoding of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()>;
}

/// A value that can be read from OPC UA binary encoding.
pub trait BinaryDecodable: Sized {
    /// Consumes the binary encoding of `Self` from `buf`.
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self>;
}

// =============================================================================
// Integer / Float Primitives
// =============================================================================

macro_rules! primitive_codec {
    ($ty:ty, $put:ident, $get:ident, $size:expr) => {
        impl BinaryEncodable for $ty {
            fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
                buf.$put(*self);
                Ok(())
            }
        }

        impl BinaryDecodable for $ty {
            fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
                need(&buf, $size)?;
                Ok(buf.$get())
            }
        }
    };
}

primitive_codec!(u8, put_u8, get_u8, 1);
primitive_codec!(i8, put_i8, get_i8, 1);
primitive_codec!(u16, put_u16_le, get_u16_le, 2);
primitive_codec!(i16, put_i16_le, get_i16_le, 2);
primitive_codec!(u32, put_u32_le, get_u32_le, 4);
primitive_codec!(i32, put_i32_le, get_i32_le, 4);
primitive_codec!(u64, put_u64_le, get_u64_le, 8);
primitive_codec!(i64, put_i64_le, get_i64_le, 8);
primitive_codec!(f32, put_f32_le, get_f32_le, 4);
primitive_codec!(f64, put_f64_le, get_f64_le, 8);

impl BinaryEncodable for bool {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        buf.put_u8(u8::from(*self));
        Ok(())
    }
}

impl BinaryDecodable for bool {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        need(&buf, 1)?;
        Ok(buf.get_u8() != 0)
    }
}

// =============================================================================
// String / ByteString
// =============================================================================

impl BinaryEncodable for str {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        encode_bytes(self.as_bytes(), buf)
    }
}

impl BinaryEncodable for [u8] {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        encode_bytes(self, buf)
    }
}

impl BinaryEncodable for String {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        encode_bytes(self.as_bytes(), buf)
    }
}

impl BinaryDecodable for String {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        let bytes = Vec::<u8>::decode(buf)?;
        String::from_utf8(bytes).map_err(|_| EncodingError::InvalidUtf8)
    }
}

fn encode_bytes(bytes: &[u8], buf: &mut BytesMut) -> EncodingResult<()> {
    let len = i32::try_from(bytes.len()).map_err(|_| EncodingError::InvalidLength {
        length: bytes.len() as i64,
    })?;
    buf.put_i32_le(len);
    buf.put_slice(bytes);
    Ok(())
}

/// Reads a length prefix; `None` means the null sentinel `-1`.
fn decode_length(buf: &mut dyn Buf) -> EncodingResult<Option<usize>> {
    need(&buf, 4)?;
    let raw = buf.get_i32_le();
    if raw == -1 {
        return Ok(None);
    }
    if raw < 0 || raw as usize > MAX_ARRAY_LENGTH {
        return Err(EncodingError::InvalidLength { length: raw as i64 });
    }
    Ok(Some(raw as usize))
}

// =============================================================================
// Arrays
// =============================================================================

/// Encodes an array with its `i32` length prefix.
pub fn encode_array<T: BinaryEncodable>(items: &[T], buf: &mut BytesMut) -> EncodingResult<()> {
    let len = i32::try_from(items.len()).map_err(|_| EncodingError::InvalidLength {
        length: items.len() as i64,
    })?;
    buf.put_i32_le(len);
    for item in items {
        item.encode(buf)?;
    }
    Ok(())
}

/// Decodes a length-prefixed array; null (`-1`) decodes as empty.
pub fn decode_array<T: BinaryDecodable>(buf: &mut dyn Buf) -> EncodingResult<Vec<T>> {
    match decode_length(buf)? {
        None => Ok(Vec::new()),
        Some(len) => {
            let mut out = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                out.push(T::decode(buf)?);
            }
            Ok(out)
        }
    }
}

// A byte string shares its wire layout with an element-wise `u8` array, so
// one pair of impls covers both `Vec<u8>` and structured arrays.
impl<T: BinaryEncodable> BinaryEncodable for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        encode_array(self, buf)
    }
}

impl<T: BinaryDecodable> BinaryDecodable for Vec<T> {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        decode_array(buf)
    }
}

// =============================================================================
// DateTime
// =============================================================================

/// Converts a wall-clock timestamp to OPC UA `DateTime` ticks.
pub fn datetime_to_ticks(dt: DateTime<Utc>) -> i64 {
    let unix_ticks = dt
        .timestamp()
        .saturating_mul(10_000_000)
        .saturating_add(i64::from(dt.timestamp_subsec_nanos() / 100));
    unix_ticks.saturating_add(EPOCH_OFFSET_SECS * 10_000_000)
}

/// Returns the current wall-clock time truncated to tick precision.
///
/// Timestamps built from this value survive an encode/decode roundtrip
/// exactly; `Utc::now()` itself carries sub-tick nanoseconds.
pub fn wire_time_now() -> DateTime<Utc> {
    ticks_to_datetime(datetime_to_ticks(Utc::now()))
}

/// Converts OPC UA `DateTime` ticks back to a wall-clock timestamp.
///
/// Out-of-range tick values collapse to the Unix epoch.
pub fn ticks_to_datetime(ticks: i64) -> DateTime<Utc> {
    let unix_ticks = ticks.saturating_sub(EPOCH_OFFSET_SECS * 10_000_000);
    let secs = unix_ticks.div_euclid(10_000_000);
    let nanos = (unix_ticks.rem_euclid(10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl BinaryEncodable for DateTime<Utc> {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        buf.put_i64_le(datetime_to_ticks(*self));
        Ok(())
    }
}

impl BinaryDecodable for DateTime<Utc> {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        need(&buf, 8)?;
        Ok(ticks_to_datetime(buf.get_i64_le()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn roundtrip<T: BinaryEncodable + BinaryDecodable + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        let mut read = buf.freeze();
        let decoded = T::decode(&mut read).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(read.remaining(), 0, "decoder left trailing bytes");
    }

    #[test]
    fn test_integer_roundtrip() {
        roundtrip(0xDEAD_BEEFu32);
        roundtrip(-12345i32);
        roundtrip(u64::MAX);
        roundtrip(true);
        roundtrip(3.5f64);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = BytesMut::new();
        0x0102_0304u32.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_string_roundtrip() {
        roundtrip("opc.tcp://localhost:4840".to_string());
        roundtrip(String::new());
    }

    #[test]
    fn test_null_string_decodes_empty() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-1);
        let mut read = buf.freeze();
        assert_eq!(String::decode(&mut read).unwrap(), "");
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-2);
        let mut read = buf.freeze();
        assert!(matches!(
            Vec::<u8>::decode(&mut read),
            Err(EncodingError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(i32::MAX);
        let mut read = buf.freeze();
        assert!(matches!(
            Vec::<u8>::decode(&mut read),
            Err(EncodingError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(16);
        buf.put_slice(&[0u8; 4]);
        let mut read = buf.freeze();
        assert!(matches!(
            Vec::<u8>::decode(&mut read),
            Err(EncodingError::BufferExhausted { .. })
        ));
    }

    #[test]
    fn test_datetime_epoch() {
        // The OPC UA epoch itself encodes as zero ticks.
        let epoch = Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(datetime_to_ticks(epoch), 0);
    }

    #[test]
    fn test_datetime_roundtrip() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 45).unwrap() + Duration::milliseconds(250);
        let ticks = datetime_to_ticks(now);
        assert_eq!(ticks_to_datetime(ticks), now);
        roundtrip(now);
    }

    #[test]
    fn test_array_roundtrip() {
        let values = vec![1u32, 2, 3, 4];
        let mut buf = BytesMut::new();
        encode_array(&values, &mut buf).unwrap();
        let mut read = buf.freeze();
        let decoded: Vec<u32> = decode_array(&mut read).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_null_array_decodes_empty() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-1);
        let mut read = buf.freeze();
        let decoded: Vec<String> = decode_array(&mut read).unwrap();
        assert!(decoded.is_empty());
    }
}
