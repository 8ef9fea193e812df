//! ISO 8073 connection-oriented transport (COTP, class 0) TPDUs.
//!
//! ```text
//! CR/CC:  LI | E0/D0 | dst-ref(2) | src-ref(2) | class | options...
//! DT:     02 | F0    | EOT/seq
//! DR:     06 | 80    | dst-ref(2) | src-ref(2) | reason
//! DC:     05 | C0    | dst-ref(2) | src-ref(2)
//! ER:     LI | 70    | dst-ref(2) | cause | ...
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{Layer, MmsError, Result};

/// Connect-Request TPDU code.
pub const CONNECT_REQUEST: u8 = 0xE0;
/// Connect-Confirm TPDU code.
pub const CONNECT_CONFIRM: u8 = 0xD0;
/// Disconnect-Request TPDU code.
pub const DISCONNECT_REQUEST: u8 = 0x80;
/// Disconnect-Confirm TPDU code.
pub const DISCONNECT_CONFIRM: u8 = 0xC0;
/// Data TPDU code.
pub const DATA: u8 = 0xF0;
/// TPDU-Error code.
pub const ERROR: u8 = 0x70;

/// Last-data-unit flag in a Data TPDU.
pub const EOT: u8 = 0x80;
/// Data TPDU header length (LI, code, EOT/sequence).
pub const DATA_HEADER_LEN: usize = 3;

/// TPDU size parameter.
pub const PARAM_TPDU_SIZE: u8 = 0xC0;
/// Calling (source) transport selector parameter.
pub const PARAM_CALLING_SELECTOR: u8 = 0xC1;
/// Called (destination) transport selector parameter.
pub const PARAM_CALLED_SELECTOR: u8 = 0xC2;

/// Negotiable maximum TPDU size, encoded as a power-of-two exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TpduSize {
    /// 128 bytes
    S128 = 7,
    /// 256 bytes
    S256 = 8,
    /// 512 bytes
    S512 = 9,
    /// 1024 bytes
    S1024 = 10,
    /// 2048 bytes
    S2048 = 11,
    /// 4096 bytes
    S4096 = 12,
    /// 8192 bytes
    S8192 = 13,
}

impl TpduSize {
    /// Size from its wire exponent.
    pub const fn from_exponent(exponent: u8) -> Option<Self> {
        match exponent {
            7 => Some(Self::S128),
            8 => Some(Self::S256),
            9 => Some(Self::S512),
            10 => Some(Self::S1024),
            11 => Some(Self::S2048),
            12 => Some(Self::S4096),
            13 => Some(Self::S8192),
            _ => None,
        }
    }

    /// Wire exponent.
    #[inline]
    pub const fn exponent(self) -> u8 {
        self as u8
    }

    /// Size in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        1 << (self as u8)
    }

    /// Largest user-data fragment that fits in one Data TPDU.
    #[inline]
    pub const fn max_fragment(self) -> usize {
        self.bytes() - DATA_HEADER_LEN
    }
}

impl Default for TpduSize {
    fn default() -> Self {
        Self::S8192
    }
}

impl std::fmt::Display for TpduSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

/// Connect-Request or Connect-Confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTpdu {
    /// True for Connect-Confirm
    pub confirm: bool,
    /// Destination reference
    pub dst_ref: u16,
    /// Source reference
    pub src_ref: u16,
    /// Protocol class and options byte
    pub class: u8,
    /// Proposed or confirmed TPDU size
    pub tpdu_size: Option<TpduSize>,
    /// Calling transport selector
    pub calling_selector: Option<Vec<u8>>,
    /// Called transport selector
    pub called_selector: Option<Vec<u8>>,
}

impl ConnectTpdu {
    /// Append the TPDU to `out`.
    ///
    /// Options are written in the order TPDU size, called selector,
    /// calling selector.
    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let mut options = BytesMut::new();
        if let Some(size) = self.tpdu_size {
            options.put_slice(&[PARAM_TPDU_SIZE, 1, size.exponent()]);
        }
        for (code, selector) in [
            (PARAM_CALLED_SELECTOR, &self.called_selector),
            (PARAM_CALLING_SELECTOR, &self.calling_selector),
        ] {
            if let Some(selector) = selector {
                let len = u8::try_from(selector.len()).map_err(|_| {
                    MmsError::malformed(Layer::Transport, "transport selector too long")
                })?;
                options.put_u8(code);
                options.put_u8(len);
                options.put_slice(selector);
            }
        }

        let li = u8::try_from(6 + options.len())
            .map_err(|_| MmsError::malformed(Layer::Transport, "connect TPDU too long"))?;
        out.reserve(1 + li as usize);
        out.put_u8(li);
        out.put_u8(if self.confirm {
            CONNECT_CONFIRM
        } else {
            CONNECT_REQUEST
        });
        out.put_u16(self.dst_ref);
        out.put_u16(self.src_ref);
        out.put_u8(self.class);
        out.put_slice(&options);
        Ok(())
    }

    fn parse(header: &[u8], confirm: bool) -> Result<Self> {
        if header.len() < 7 {
            return Err(MmsError::malformed(Layer::Transport, "short connect TPDU"));
        }
        let mut tpdu = Self {
            confirm,
            dst_ref: u16::from_be_bytes([header[2], header[3]]),
            src_ref: u16::from_be_bytes([header[4], header[5]]),
            class: header[6],
            tpdu_size: None,
            calling_selector: None,
            called_selector: None,
        };

        let mut pos = 7;
        while pos < header.len() {
            if pos + 2 > header.len() {
                return Err(MmsError::malformed(Layer::Transport, "truncated COTP option"));
            }
            let code = header[pos];
            let len = header[pos + 1] as usize;
            let value = header
                .get(pos + 2..pos + 2 + len)
                .ok_or_else(|| MmsError::malformed(Layer::Transport, "truncated COTP option"))?;
            match code {
                PARAM_TPDU_SIZE => {
                    let exponent = value.first().copied().unwrap_or_default();
                    tpdu.tpdu_size = Some(TpduSize::from_exponent(exponent).ok_or_else(|| {
                        MmsError::malformed(
                            Layer::Transport,
                            format!("TPDU size exponent {}", exponent),
                        )
                    })?);
                }
                PARAM_CALLING_SELECTOR => tpdu.calling_selector = Some(value.to_vec()),
                PARAM_CALLED_SELECTOR => tpdu.called_selector = Some(value.to_vec()),
                // other options (checksum, version, ...) are not used in class 0
                _ => {}
            }
            pos += 2 + len;
        }
        Ok(tpdu)
    }
}

/// Disconnect-Request or Disconnect-Confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectTpdu {
    /// True for Disconnect-Confirm
    pub confirm: bool,
    /// Destination reference
    pub dst_ref: u16,
    /// Source reference
    pub src_ref: u16,
    /// Disconnect reason (requests only)
    pub reason: u8,
}

impl DisconnectTpdu {
    /// Append the TPDU to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        if self.confirm {
            out.put_slice(&[5, DISCONNECT_CONFIRM]);
            out.put_u16(self.dst_ref);
            out.put_u16(self.src_ref);
        } else {
            out.put_slice(&[6, DISCONNECT_REQUEST]);
            out.put_u16(self.dst_ref);
            out.put_u16(self.src_ref);
            out.put_u8(self.reason);
        }
    }
}

/// A parsed TPDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tpdu<'a> {
    /// Connect-Request / Connect-Confirm
    Connect(ConnectTpdu),
    /// Data fragment
    Data {
        /// EOT flag: this is the last fragment
        last: bool,
        /// User data
        payload: &'a [u8],
    },
    /// Disconnect-Request / Disconnect-Confirm
    Disconnect(DisconnectTpdu),
    /// TPDU-Error
    Error {
        /// Reject cause
        cause: u8,
    },
}

/// Append a Data TPDU header.
#[inline]
pub fn encode_data_header(last: bool, out: &mut BytesMut) {
    out.put_slice(&[2, DATA, if last { EOT } else { 0x00 }]);
}

/// Parse one TPDU (TPKT header already stripped).
pub fn parse(tpdu: &[u8]) -> Result<Tpdu<'_>> {
    if tpdu.len() < 2 {
        return Err(MmsError::malformed(Layer::Transport, "empty TPDU"));
    }
    let li = tpdu[0] as usize;
    let header = tpdu
        .get(..li + 1)
        .ok_or_else(|| MmsError::malformed(Layer::Transport, "TPDU header past end of frame"))?;
    if li < 1 {
        return Err(MmsError::malformed(Layer::Transport, "zero TPDU length indicator"));
    }

    match header[1] & 0xF0 {
        DATA => {
            if header.len() < DATA_HEADER_LEN {
                return Err(MmsError::malformed(Layer::Transport, "short data TPDU"));
            }
            Ok(Tpdu::Data {
                last: header[2] & EOT != 0,
                payload: &tpdu[li + 1..],
            })
        }
        CONNECT_REQUEST => Ok(Tpdu::Connect(ConnectTpdu::parse(header, false)?)),
        CONNECT_CONFIRM => Ok(Tpdu::Connect(ConnectTpdu::parse(header, true)?)),
        code @ (DISCONNECT_REQUEST | DISCONNECT_CONFIRM) => {
            if header.len() < 6 {
                return Err(MmsError::malformed(Layer::Transport, "short disconnect TPDU"));
            }
            Ok(Tpdu::Disconnect(DisconnectTpdu {
                confirm: code == DISCONNECT_CONFIRM,
                dst_ref: u16::from_be_bytes([header[2], header[3]]),
                src_ref: u16::from_be_bytes([header[4], header[5]]),
                reason: header.get(6).copied().unwrap_or_default(),
            }))
        }
        ERROR => Ok(Tpdu::Error {
            cause: header.get(4).copied().unwrap_or_default(),
        }),
        _ => Err(MmsError::unknown_tag(Layer::Transport, header[1])),
    }
}
