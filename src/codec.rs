//! TPKT (RFC 1006) framing codec for tokio.
//!
//! This module frames COTP TPDUs on a byte stream using the tokio-util
//! codec framework. The transport connection drives the decoder over its
//! own frame buffer; the same codec works with `Framed` for scripted peers.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Layer, MmsError};

/// TPKT version byte.
pub const TPKT_VERSION: u8 = 0x03;
/// TPKT header length.
pub const TPKT_HEADER_LEN: usize = 4;
/// Largest frame the 16-bit length field can describe.
pub const MAX_TPKT_LENGTH: usize = u16::MAX as usize;

/// Decoded TPKT header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpktHeader {
    /// Total frame length, header included
    pub length: usize,
}

impl TpktHeader {
    /// Parse and validate a 4-byte header.
    pub fn parse(header: &[u8]) -> Result<Self, MmsError> {
        if header.len() < TPKT_HEADER_LEN {
            return Err(MmsError::malformed(Layer::Transport, "short TPKT header"));
        }
        if header[0] != TPKT_VERSION {
            return Err(MmsError::malformed(
                Layer::Transport,
                format!("TPKT version 0x{:02X}", header[0]),
            ));
        }
        if header[1] != 0x00 {
            return Err(MmsError::malformed(
                Layer::Transport,
                "TPKT reserved byte is not zero",
            ));
        }
        let length = u16::from_be_bytes([header[2], header[3]]) as usize;
        if length < TPKT_HEADER_LEN {
            return Err(MmsError::malformed(
                Layer::Transport,
                format!("TPKT length {} shorter than header", length),
            ));
        }
        Ok(Self { length })
    }

    /// Header for a frame carrying `payload_len` bytes.
    pub fn for_payload(payload_len: usize) -> Result<Self, MmsError> {
        let length = payload_len + TPKT_HEADER_LEN;
        if length > MAX_TPKT_LENGTH {
            return Err(MmsError::BufferCapacityExceeded {
                requested: length,
                capacity: MAX_TPKT_LENGTH,
            });
        }
        Ok(Self { length })
    }

    /// Payload length.
    #[inline]
    pub const fn payload_len(&self) -> usize {
        self.length - TPKT_HEADER_LEN
    }

    /// Wire form of the header.
    #[inline]
    pub fn to_bytes(&self) -> [u8; TPKT_HEADER_LEN] {
        let len = (self.length as u16).to_be_bytes();
        [TPKT_VERSION, 0x00, len[0], len[1]]
    }
}

/// TPKT codec.
///
/// Decodes complete frames into their TPDU (header stripped) and encodes
/// TPDUs by prefixing the header.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use voltage_iec61850::codec::TpktCodec;
///
/// let stream = TcpStream::connect("192.168.1.100:102").await?;
/// let mut framed = Framed::new(stream, TpktCodec::new());
///
/// framed.send(Bytes::from_static(&[0x02, 0xF0, 0x80])).await?;
/// while let Some(tpdu) = framed.next().await {
///     println!("Received: {:02X?}", &tpdu?[..]);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TpktCodec {
    state: DecodeState,
}

#[derive(Debug, Clone, Copy, Default)]
enum DecodeState {
    #[default]
    WaitingForHeader,
    WaitingForBody {
        length: usize,
    },
}

impl TpktCodec {
    /// Create a new TPKT codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any partially decoded header.
    pub fn reset(&mut self) {
        self.state = DecodeState::WaitingForHeader;
    }
}

impl Decoder for TpktCodec {
    type Item = BytesMut;
    type Error = MmsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::WaitingForHeader => {
                    if src.len() < TPKT_HEADER_LEN {
                        return Ok(None);
                    }
                    let header = TpktHeader::parse(&src[..TPKT_HEADER_LEN])?;
                    self.state = DecodeState::WaitingForBody {
                        length: header.length,
                    };
                }

                DecodeState::WaitingForBody { length } => {
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }

                    let mut frame = src.split_to(length);
                    self.state = DecodeState::WaitingForHeader;
                    return Ok(Some(frame.split_off(TPKT_HEADER_LEN)));
                }
            }
        }
    }
}

impl Encoder<Bytes> for TpktCodec {
    type Error = MmsError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = TpktHeader::for_payload(item.len())?;
        dst.reserve(header.length);
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_frame() {
        let mut codec = TpktCodec::new();
        let mut buf = BytesMut::from(&[0x03, 0x00, 0x00, 0x07, 0x02, 0xF0, 0x80][..]);

        let tpdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&tpdu[..], &[0x02, 0xF0, 0x80]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = TpktCodec::new();

        let mut buf = BytesMut::from(&[0x03, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x00, 0x08, 0x02, 0xF0]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x80, 0xAB, 0x03]);
        let tpdu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&tpdu[..], &[0x02, 0xF0, 0x80, 0xAB]);
        // start of the next frame stays buffered
        assert_eq!(&buf[..], &[0x03]);
    }

    #[test]
    fn test_decode_back_to_back() {
        let mut codec = TpktCodec::new();
        let mut buf = BytesMut::from(
            &[
                0x03, 0x00, 0x00, 0x05, 0x01, //
                0x03, 0x00, 0x00, 0x06, 0x02, 0x03,
            ][..],
        );

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &[0x01]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &[0x02, 0x03]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        let mut codec = TpktCodec::new();
        let mut buf = BytesMut::from(&[0x68, 0x04, 0x07, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(MmsError::Malformed {
                layer: Layer::Transport,
                ..
            })
        ));

        let mut buf = BytesMut::from(&[0x03, 0x01, 0x00, 0x07][..]);
        assert!(codec.decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&[0x03, 0x00, 0x00, 0x03][..]);
        assert!(TpktCodec::new().decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_frame() {
        let mut codec = TpktCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(Bytes::from_static(&[0x02, 0xF0, 0x80]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[0x03, 0x00, 0x00, 0x07, 0x02, 0xF0, 0x80]);
    }

    #[test]
    fn test_encode_too_large() {
        let mut codec = TpktCodec::new();
        let mut buf = BytesMut::new();
        let payload = Bytes::from(vec![0u8; MAX_TPKT_LENGTH]);
        assert!(matches!(
            codec.encode(payload, &mut buf),
            Err(MmsError::BufferCapacityExceeded { .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_roundtrip() {
        let header = TpktHeader::for_payload(183).unwrap();
        assert_eq!(header.to_bytes(), [0x03, 0x00, 0x00, 0xBB]);
        assert_eq!(TpktHeader::parse(&header.to_bytes()).unwrap(), header);
        assert_eq!(header.payload_len(), 183);
    }
}
