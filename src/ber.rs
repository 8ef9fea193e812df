//! Tag-length-value (ASN.1 BER subset) codec.
//!
//! Every layer above the transport builds and walks its PDUs with the
//! helpers in this module. Only single-byte tags and definite lengths are
//! used on this stack.
//!
//! Decoders take `(buf, pos, limit)` and never read at or beyond `limit`;
//! content decoders take the exact content slice of one element.

use bytes::{BufMut, BytesMut};

use crate::error::{Layer, MmsError, Result};

/// Universal BOOLEAN tag.
pub const TAG_BOOLEAN: u8 = 0x01;
/// Universal INTEGER tag.
pub const TAG_INTEGER: u8 = 0x02;
/// Universal BIT STRING tag.
pub const TAG_BIT_STRING: u8 = 0x03;
/// Universal OCTET STRING tag.
pub const TAG_OCTET_STRING: u8 = 0x04;
/// Universal OBJECT IDENTIFIER tag.
pub const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
/// Universal VisibleString tag.
pub const TAG_VISIBLE_STRING: u8 = 0x1A;
/// Universal constructed SEQUENCE tag.
pub const TAG_SEQUENCE: u8 = 0x30;

/// A decoded tag + length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv {
    /// Tag byte
    pub tag: u8,
    /// Content length
    pub length: usize,
}

impl Tlv {
    /// Check if the constructed bit is set.
    #[inline]
    pub const fn is_constructed(&self) -> bool {
        self.tag & 0x20 != 0
    }

    /// Context-specific tag number, if the tag is context-specific.
    #[inline]
    pub const fn context_number(&self) -> Option<u8> {
        if self.tag & 0xC0 == 0x80 {
            Some(self.tag & 0x1F)
        } else {
            None
        }
    }
}

/// Number of bytes `encode_length` emits for `length`.
#[inline]
pub const fn length_size(length: usize) -> usize {
    if length < 0x80 {
        1
    } else if length <= 0xFF {
        2
    } else if length <= 0xFFFF {
        3
    } else if length <= 0xFF_FFFF {
        4
    } else {
        5
    }
}

/// Size of a complete element whose content is `length` bytes.
#[inline]
pub const fn element_size(length: usize) -> usize {
    1 + length_size(length) + length
}

/// Encode a definite length in its minimal form.
///
/// Returns the number of bytes written.
pub fn encode_length(length: usize, out: &mut BytesMut) -> usize {
    let size = length_size(length);
    if size == 1 {
        out.put_u8(length as u8);
    } else {
        let count = size - 1;
        out.put_u8(0x80 | count as u8);
        let bytes = (length as u64).to_be_bytes();
        out.put_slice(&bytes[8 - count..]);
    }
    size
}

/// Encode a tag and length header.
///
/// Returns the number of bytes written.
pub fn encode_tl(tag: u8, length: usize, out: &mut BytesMut) -> usize {
    out.put_u8(tag);
    1 + encode_length(length, out)
}

/// Encode a complete element with the given content.
pub fn encode_element(tag: u8, content: &[u8], out: &mut BytesMut) -> usize {
    let header = encode_tl(tag, content.len(), out);
    out.put_slice(content);
    header + content.len()
}

/// Decode a length field starting at `pos`.
///
/// Returns the position of the first content byte and the content length.
/// Fails with `BufferOverflow` when the length bytes or the content would
/// extend past `limit`.
pub fn decode_length(buf: &[u8], pos: usize, limit: usize) -> Result<(usize, usize)> {
    let limit = limit.min(buf.len());
    if pos >= limit {
        return Err(MmsError::BufferOverflow {
            offset: pos,
            needed: 1,
            limit,
        });
    }

    let lead = buf[pos];
    let mut cursor = pos + 1;
    let length = if lead & 0x80 == 0 {
        lead as usize
    } else {
        let count = (lead & 0x7F) as usize;
        if count == 0 {
            return Err(MmsError::malformed(Layer::Ber, "indefinite length"));
        }
        if count > 4 {
            return Err(MmsError::malformed(Layer::Ber, "length field longer than 4 bytes"));
        }
        if cursor + count > limit {
            return Err(MmsError::BufferOverflow {
                offset: cursor,
                needed: count,
                limit,
            });
        }
        let mut length = 0usize;
        for &b in &buf[cursor..cursor + count] {
            length = (length << 8) | b as usize;
        }
        cursor += count;
        length
    };

    if length > limit - cursor {
        return Err(MmsError::BufferOverflow {
            offset: cursor,
            needed: length,
            limit,
        });
    }

    Ok((cursor, length))
}

/// Decode a tag and length header starting at `pos`.
///
/// Returns the position of the first content byte and the header.
pub fn decode_tl(buf: &[u8], pos: usize, limit: usize) -> Result<(usize, Tlv)> {
    let limit = limit.min(buf.len());
    if pos >= limit {
        return Err(MmsError::BufferOverflow {
            offset: pos,
            needed: 1,
            limit,
        });
    }
    let tag = buf[pos];
    let (content, length) = decode_length(buf, pos + 1, limit)?;
    Ok((content, Tlv { tag, length }))
}

/// Iterator over the elements of a constructed value.
///
/// Yields `(tag, content)` pairs and stops after the first error.
pub struct Elements<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Elements<'a> {
    /// Iterate over the concatenated elements in `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let buf = self.buf;
        match decode_tl(buf, self.pos, buf.len()) {
            Ok((start, tlv)) => {
                self.pos = start + tlv.length;
                Some(Ok((tlv.tag, &buf[start..start + tlv.length])))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode the leading element of `buf`, which must carry `tag`, and return its content.
pub fn expect_element(buf: &[u8], tag: u8, layer: Layer) -> Result<&[u8]> {
    let (start, tlv) = decode_tl(buf, 0, buf.len())?;
    if tlv.tag != tag {
        return Err(MmsError::unknown_tag(layer, tlv.tag));
    }
    Ok(&buf[start..start + tlv.length])
}

// ============================================================================
// Integers
// ============================================================================

/// Minimal two's-complement big-endian content for a signed value.
pub fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Minimal big-endian content for an unsigned value.
///
/// A leading `0x00` is kept only where the next byte has its high bit set.
pub fn unsigned_content(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 && bytes[start] == 0 {
        start += 1;
    }
    let mut content = Vec::with_capacity(9 - start);
    if bytes[start] & 0x80 != 0 {
        content.push(0x00);
    }
    content.extend_from_slice(&bytes[start..]);
    content
}

/// Encode a signed integer element.
pub fn encode_integer(tag: u8, value: i64, out: &mut BytesMut) -> usize {
    encode_element(tag, &integer_content(value), out)
}

/// Encode an unsigned integer element.
pub fn encode_unsigned(tag: u8, value: u64, out: &mut BytesMut) -> usize {
    encode_element(tag, &unsigned_content(value), out)
}

/// Decode signed integer content (1 to 8 bytes).
pub fn decode_integer(content: &[u8]) -> Result<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(MmsError::malformed(
            Layer::Ber,
            format!("integer of {} bytes", content.len()),
        ));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | b as i64;
    }
    Ok(value)
}

/// Decode unsigned integer content (1 to 8 significant bytes).
pub fn decode_unsigned(content: &[u8]) -> Result<u64> {
    let significant = match content {
        [0x00, rest @ ..] if !rest.is_empty() => rest,
        _ => content,
    };
    if significant.is_empty() || significant.len() > 8 {
        return Err(MmsError::malformed(
            Layer::Ber,
            format!("unsigned of {} bytes", content.len()),
        ));
    }
    Ok(significant.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

// ============================================================================
// Booleans, strings, floats
// ============================================================================

/// Encode a boolean element.
pub fn encode_boolean(tag: u8, value: bool, out: &mut BytesMut) -> usize {
    encode_element(tag, &[if value { 0xFF } else { 0x00 }], out)
}

/// Decode boolean content.
pub fn decode_boolean(content: &[u8]) -> Result<bool> {
    match content {
        [b] => Ok(*b != 0),
        _ => Err(MmsError::malformed(Layer::Ber, "boolean must be 1 byte")),
    }
}

/// Encode an octet/visible string element.
pub fn encode_octet_string(tag: u8, data: &[u8], out: &mut BytesMut) -> usize {
    encode_element(tag, data, out)
}

/// Decode visible-string content.
pub fn decode_visible_string(content: &[u8]) -> Result<String> {
    if !content.iter().all(|b| (0x20..0x7F).contains(b)) {
        return Err(MmsError::malformed(Layer::Ber, "non-printable visible string"));
    }
    Ok(content.iter().map(|&b| b as char).collect())
}

/// Exponent width that prefixes a single-precision MMS float.
pub const FLOAT32_EXPONENT_WIDTH: u8 = 8;
/// Exponent width that prefixes a double-precision MMS float.
pub const FLOAT64_EXPONENT_WIDTH: u8 = 11;

/// Encode an MMS floating-point element (exponent width + IEEE 754 single).
pub fn encode_float32(tag: u8, value: f32, out: &mut BytesMut) -> usize {
    let mut content = [0u8; 5];
    content[0] = FLOAT32_EXPONENT_WIDTH;
    content[1..].copy_from_slice(&value.to_be_bytes());
    encode_element(tag, &content, out)
}

/// Decode MMS floating-point content.
///
/// Doubles are narrowed to single precision.
pub fn decode_float(content: &[u8]) -> Result<f32> {
    match content {
        [FLOAT32_EXPONENT_WIDTH, a, b, c, d] => Ok(f32::from_be_bytes([*a, *b, *c, *d])),
        [FLOAT64_EXPONENT_WIDTH, rest @ ..] if rest.len() == 8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(rest);
            Ok(f64::from_be_bytes(raw) as f32)
        }
        _ => Err(MmsError::malformed(
            Layer::Ber,
            format!("floating-point of {} bytes", content.len()),
        )),
    }
}

// ============================================================================
// Bit strings
// ============================================================================

/// Encode a bit-string element with an explicit unused-bit count.
pub fn encode_bit_string(tag: u8, bits: &[u8], unused: u8, out: &mut BytesMut) -> usize {
    let header = encode_tl(tag, bits.len() + 1, out);
    out.put_u8(unused & 0x07);
    out.put_slice(bits);
    header + 1 + bits.len()
}

/// Decode bit-string content into `(unused_bits, packed_bits)`.
pub fn decode_bit_string(content: &[u8]) -> Result<(u8, &[u8])> {
    let (&unused, bits) = content
        .split_first()
        .ok_or_else(|| MmsError::malformed(Layer::Ber, "empty bit string"))?;
    if unused > 7 {
        return Err(MmsError::malformed(
            Layer::Ber,
            format!("bit string claims {unused} unused bits"),
        ));
    }
    if bits.is_empty() && unused != 0 {
        return Err(MmsError::malformed(Layer::Ber, "unused bits in empty bit string"));
    }
    Ok((unused, bits))
}

/// Pack bit offsets into a bit string of `bit_count` bits.
///
/// Bit 0 is the most significant bit of the first byte. Offsets at or
/// beyond `bit_count` are ignored. Returns the packed bytes and the
/// unused-bit count of the final byte.
pub fn encode_bit_offsets<I>(offsets: I, bit_count: usize) -> (Vec<u8>, u8)
where
    I: IntoIterator<Item = usize>,
{
    let byte_count = bit_count.div_ceil(8);
    let mut bytes = vec![0u8; byte_count];
    for offset in offsets {
        if offset < bit_count {
            bytes[offset / 8] |= 0x80 >> (offset % 8);
        }
    }
    (bytes, (byte_count * 8 - bit_count) as u8)
}

/// Unpack a bit string into the offsets of its set bits.
pub fn decode_bit_offsets(bits: &[u8], unused: u8) -> Vec<usize> {
    let total = (bits.len() * 8).saturating_sub(unused as usize);
    (0..total)
        .filter(|&offset| bits[offset / 8] & (0x80 >> (offset % 8)) != 0)
        .collect()
}

// ============================================================================
// Object identifiers
// ============================================================================

/// Encode object identifier content from its arcs.
pub fn oid_content(arcs: &[u32]) -> Vec<u8> {
    let mut content = Vec::new();
    let mut push_arc = |mut arc: u32| {
        let mut tmp = [0u8; 5];
        let mut n = 0;
        loop {
            tmp[n] = (arc & 0x7F) as u8;
            n += 1;
            arc >>= 7;
            if arc == 0 {
                break;
            }
        }
        for i in (0..n).rev() {
            content.push(tmp[i] | if i > 0 { 0x80 } else { 0x00 });
        }
    };
    match arcs {
        [] => {}
        [first] => push_arc(first * 40),
        [first, second, rest @ ..] => {
            push_arc(first * 40 + second);
            for &arc in rest {
                push_arc(arc);
            }
        }
    }
    content
}

/// Encode an object identifier element.
pub fn encode_oid(tag: u8, arcs: &[u32], out: &mut BytesMut) -> usize {
    encode_element(tag, &oid_content(arcs), out)
}

/// Decode object identifier content into its arcs.
pub fn decode_oid(content: &[u8]) -> Result<Vec<u32>> {
    if content.is_empty() {
        return Err(MmsError::malformed(Layer::Ber, "empty object identifier"));
    }
    let mut arcs = Vec::new();
    let mut value: u32 = 0;
    let mut in_arc = false;
    for &b in content {
        if value > (u32::MAX >> 7) {
            return Err(MmsError::malformed(Layer::Ber, "object identifier arc overflow"));
        }
        value = (value << 7) | (b & 0x7F) as u32;
        in_arc = b & 0x80 != 0;
        if !in_arc {
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        }
    }
    if in_arc {
        return Err(MmsError::malformed(Layer::Ber, "truncated object identifier"));
    }
    Ok(arcs)
}
