//! Data values returned by MMS reads.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;

use crate::ber;
use crate::error::{Layer, MmsError, Result};

/// Data CHOICE tag for bit-string.
pub const TAG_BIT_STRING: u8 = 0x84;
/// Data CHOICE tag for integer.
pub const TAG_INTEGER: u8 = 0x85;
/// Data CHOICE tag for floating-point.
pub const TAG_FLOAT: u8 = 0x87;
/// Data CHOICE tag for utc-time.
pub const TAG_UTC_TIME: u8 = 0x91;

/// UtcTime wire length.
pub const UTC_TIME_LEN: usize = 8;

/// A decoded data value.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    /// IEEE 754 single precision
    Float32(f32),
    /// Signed integer
    Int32(i32),
    /// Timestamp
    UtcTime(UtcTime),
    /// Bit string, e.g. quality
    BitString(BitString),
}

impl Variant {
    /// Value as f32. Non-numeric values yield 0.0.
    #[inline]
    pub fn as_f32(&self) -> f32 {
        match self {
            Self::Float32(v) => *v,
            Self::Int32(v) => *v as f32,
            _ => 0.0,
        }
    }

    /// Value as i32. Floats are truncated; non-numeric values yield 0.
    #[inline]
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Int32(v) => *v,
            Self::Float32(v) => *v as i32,
            _ => 0,
        }
    }

    /// Value as bool: non-zero numbers and bit strings with bit 0 set.
    #[inline]
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Int32(v) => *v != 0,
            Self::Float32(v) => *v != 0.0,
            Self::BitString(bits) => bits.get(0),
            Self::UtcTime(_) => false,
        }
    }

    /// Timestamp, if this is one.
    #[inline]
    pub fn as_utc_time(&self) -> Option<&UtcTime> {
        match self {
            Self::UtcTime(t) => Some(t),
            _ => None,
        }
    }

    /// Bit string, if this is one.
    #[inline]
    pub fn as_bit_string(&self) -> Option<&BitString> {
        match self {
            Self::BitString(b) => Some(b),
            _ => None,
        }
    }

    /// Check if this is a numeric value.
    #[inline]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Float32(_) | Self::Int32(_))
    }

    /// Decode from a Data CHOICE element.
    pub fn decode(tag: u8, content: &[u8]) -> Result<Self> {
        match tag {
            TAG_FLOAT => Ok(Self::Float32(ber::decode_float(content)?)),
            TAG_INTEGER => {
                let value = ber::decode_integer(content)?;
                let value = i32::try_from(value).map_err(|_| {
                    MmsError::malformed(Layer::Mms, format!("integer {} exceeds 32 bits", value))
                })?;
                Ok(Self::Int32(value))
            }
            TAG_UTC_TIME => Ok(Self::UtcTime(UtcTime::from_bytes(content)?)),
            TAG_BIT_STRING => {
                let (unused, bits) = ber::decode_bit_string(content)?;
                Ok(Self::BitString(BitString::from_raw(bits.to_vec(), unused)?))
            }
            other => Err(MmsError::unknown_tag(Layer::Mms, other)),
        }
    }

    /// Append the Data CHOICE element.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Float32(v) => {
                ber::encode_float32(TAG_FLOAT, *v, out);
            }
            Self::Int32(v) => {
                ber::encode_integer(TAG_INTEGER, *v as i64, out);
            }
            Self::UtcTime(t) => {
                ber::encode_element(TAG_UTC_TIME, &t.to_bytes(), out);
            }
            Self::BitString(b) => {
                ber::encode_bit_string(TAG_BIT_STRING, b.as_bytes(), b.unused_bits(), out);
            }
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float32(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UtcTime(t) => write!(f, "{}", t),
            Self::BitString(b) => write!(f, "{}", b),
        }
    }
}

/// Bit string with its significant bit count. Bit 0 is the most
/// significant bit of the first byte.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitString {
    bytes: Vec<u8>,
    len: usize,
}

impl BitString {
    /// Build from packed bytes and the unused-bit count of the last byte.
    pub fn from_raw(bytes: Vec<u8>, unused: u8) -> Result<Self> {
        if unused > 7 || (bytes.is_empty() && unused != 0) {
            return Err(MmsError::malformed(
                Layer::Mms,
                format!("{} unused bits", unused),
            ));
        }
        let len = bytes.len() * 8 - unused as usize;
        Ok(Self { bytes, len })
    }

    /// Build from individual bits.
    pub fn from_bits(bits: &[bool]) -> Self {
        let set = bits.iter().enumerate().filter(|(_, b)| **b).map(|(i, _)| i);
        let (bytes, _) = ber::encode_bit_offsets(set, bits.len());
        Self {
            bytes,
            len: bits.len(),
        }
    }

    /// Number of significant bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if there are no bits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bit at `index`; out of range reads as false.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.bytes[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Packed bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Unused bits in the last byte.
    #[inline]
    pub fn unused_bits(&self) -> u8 {
        (self.bytes.len() * 8 - self.len) as u8
    }

    /// Offsets of the set bits.
    pub fn set_bits(&self) -> Vec<usize> {
        ber::decode_bit_offsets(&self.bytes, self.unused_bits())
    }
}

impl std::fmt::Display for BitString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.len {
            f.write_str(if self.get(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Time quality flags carried in the last byte of a UtcTime.
///
/// Bit layout (MSB first):
/// - Bit 7: leap second known
/// - Bit 6: clock failure
/// - Bit 5: clock not synchronized
/// - Bits 0-4: number of significant fraction bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct TimeQuality(u8);

impl TimeQuality {
    const LEAP_SECOND_KNOWN: u8 = 0x80;
    const CLOCK_FAILURE: u8 = 0x40;
    const NOT_SYNCHRONIZED: u8 = 0x20;
    const ACCURACY_MASK: u8 = 0x1F;

    /// Create from raw byte value.
    #[inline(always)]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw byte value.
    #[inline(always)]
    pub const fn as_raw(&self) -> u8 {
        self.0
    }

    /// Leap second known.
    #[inline(always)]
    pub const fn leap_second_known(&self) -> bool {
        self.0 & Self::LEAP_SECOND_KNOWN != 0
    }

    /// Clock failure.
    #[inline(always)]
    pub const fn clock_failure(&self) -> bool {
        self.0 & Self::CLOCK_FAILURE != 0
    }

    /// Clock not synchronized.
    #[inline(always)]
    pub const fn clock_not_synchronized(&self) -> bool {
        self.0 & Self::NOT_SYNCHRONIZED != 0
    }

    /// Significant bits of the fraction; 31 means unspecified.
    #[inline(always)]
    pub const fn accuracy(&self) -> u8 {
        self.0 & Self::ACCURACY_MASK
    }
}

/// MMS UtcTime: seconds since the Unix epoch, a 24-bit binary fraction
/// of a second and a quality byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UtcTime {
    /// Seconds since 1970-01-01T00:00:00Z
    pub seconds: u32,
    /// Fraction of a second in units of 2^-24
    pub fraction: u32,
    /// Time quality
    pub quality: TimeQuality,
}

impl UtcTime {
    /// Parse from 8 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != UTC_TIME_LEN {
            return Err(MmsError::malformed(
                Layer::Mms,
                format!("utc-time of {} bytes", bytes.len()),
            ));
        }
        Ok(Self {
            seconds: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            fraction: u32::from_be_bytes([0, bytes[4], bytes[5], bytes[6]]),
            quality: TimeQuality::from_raw(bytes[7]),
        })
    }

    /// Encode to 8 bytes.
    pub fn to_bytes(&self) -> [u8; UTC_TIME_LEN] {
        let s = self.seconds.to_be_bytes();
        let f = self.fraction.to_be_bytes();
        [s[0], s[1], s[2], s[3], f[1], f[2], f[3], self.quality.as_raw()]
    }

    /// Timestamp for `time`, with unspecified accuracy.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let fraction = (u64::from(since_epoch.subsec_nanos()) << 24) / 1_000_000_000;
        Self {
            seconds: since_epoch.as_secs() as u32,
            fraction: fraction as u32,
            quality: TimeQuality::from_raw(0x1F),
        }
    }

    /// Nanoseconds represented by the fraction.
    #[inline]
    pub fn subsec_nanos(&self) -> u32 {
        ((u64::from(self.fraction & 0x00FF_FFFF) * 1_000_000_000) >> 24) as u32
    }

    /// Convert to `SystemTime`.
    pub fn to_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::new(u64::from(self.seconds), self.subsec_nanos())
    }
}

impl std::fmt::Display for UtcTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}s", self.seconds, self.subsec_nanos())
    }
}

/// IEC 61850 quality validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Good
    Good,
    /// Invalid
    Invalid,
    /// Reserved code
    Reserved,
    /// Questionable
    Questionable,
}

/// IEC 61850 quality (13-bit bit string) view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quality(BitString);

impl Quality {
    /// Wrap a quality bit string.
    pub fn new(bits: BitString) -> Self {
        Self(bits)
    }

    /// Validity from bits 0 and 1.
    pub fn validity(&self) -> Validity {
        match (self.0.get(0), self.0.get(1)) {
            (false, false) => Validity::Good,
            (false, true) => Validity::Invalid,
            (true, false) => Validity::Reserved,
            (true, true) => Validity::Questionable,
        }
    }

    /// Check if the value is good and no detail flag is set.
    pub fn is_good(&self) -> bool {
        self.validity() == Validity::Good && (2..=9).all(|i| !self.0.get(i))
    }

    /// Overflow.
    pub fn overflow(&self) -> bool {
        self.0.get(2)
    }

    /// Old data.
    pub fn old_data(&self) -> bool {
        self.0.get(7)
    }

    /// Substituted source.
    pub fn substituted(&self) -> bool {
        self.0.get(10)
    }

    /// Test mode.
    pub fn test(&self) -> bool {
        self.0.get(11)
    }

    /// Operator blocked.
    pub fn operator_blocked(&self) -> bool {
        self.0.get(12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_float() {
        let value = Variant::decode(TAG_FLOAT, &[0x08, 0x41, 0x20, 0x00, 0x00]).unwrap();
        assert_eq!(value, Variant::Float32(10.0));
        assert_eq!(value.as_f32(), 10.0);
        assert_eq!(value.as_i32(), 10);
        assert!(value.as_bool());
    }

    #[test]
    fn test_decode_integer() {
        let value = Variant::decode(TAG_INTEGER, &[0xFF, 0x38]).unwrap();
        assert_eq!(value, Variant::Int32(-200));

        let err = Variant::decode(TAG_INTEGER, &[0x01, 0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_bit_string() {
        // 13-bit quality, questionable + old data
        let value = Variant::decode(TAG_BIT_STRING, &[0x03, 0xC1, 0x00]).unwrap();
        let bits = value.as_bit_string().unwrap();
        assert_eq!(bits.len(), 13);
        assert_eq!(bits.set_bits(), vec![0, 1, 7]);
        assert_eq!(bits.to_string(), "1100000100000");

        let quality = Quality::new(bits.clone());
        assert_eq!(quality.validity(), Validity::Questionable);
        assert!(quality.old_data());
        assert!(!quality.is_good());
    }

    #[test]
    fn test_decode_utc_time() {
        let bytes = [0x65, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x0A];
        let value = Variant::decode(TAG_UTC_TIME, &bytes).unwrap();
        let time = value.as_utc_time().unwrap();
        assert_eq!(time.seconds, 0x6500_0000);
        assert_eq!(time.subsec_nanos(), 500_000_000);
        assert_eq!(time.quality.accuracy(), 10);
        assert!(!time.quality.clock_failure());
        assert_eq!(time.to_bytes(), bytes);

        assert!(Variant::decode(TAG_UTC_TIME, &bytes[..7]).is_err());
    }

    #[test]
    fn test_unknown_value_tag() {
        assert!(matches!(
            Variant::decode(0x83, &[0x01]),
            Err(MmsError::UnknownTag {
                layer: Layer::Mms,
                tag: 0x83
            })
        ));
    }

    #[test]
    fn test_encode_values() {
        let mut buf = BytesMut::new();
        Variant::Int32(65000).encode(&mut buf);
        Variant::Float32(1.5).encode(&mut buf);
        Variant::BitString(BitString::from_bits(&[false, true, false])).encode(&mut buf);
        assert_eq!(
            &buf[..],
            &[
                0x85, 0x03, 0x00, 0xFD, 0xE8, //
                0x87, 0x05, 0x08, 0x3F, 0xC0, 0x00, 0x00, //
                0x84, 0x02, 0x05, 0x40
            ]
        );
    }

    #[test]
    fn test_system_time_conversion() {
        let time = UNIX_EPOCH + Duration::new(1_700_000_000, 250_000_000);
        let utc = UtcTime::from_system_time(time);
        assert_eq!(utc.seconds, 1_700_000_000);
        assert_eq!(utc.fraction, 0x40_0000);
        assert_eq!(utc.to_system_time(), time);
    }

    #[test]
    fn test_conversions_never_panic() {
        let time = Variant::UtcTime(UtcTime::default());
        assert_eq!(time.as_f32(), 0.0);
        assert_eq!(time.as_i32(), 0);
        assert!(!time.as_bool());
        assert!(!time.is_numeric());
        assert!(BitString::default().is_empty());
        assert!(!BitString::default().get(3));
        assert!(BitString::from_raw(vec![], 3).is_err());
        assert!(BitString::from_raw(vec![0xFF], 8).is_err());
    }
}
